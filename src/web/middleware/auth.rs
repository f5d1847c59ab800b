//! Identity extraction.
//!
//! Authentication happens upstream; the proxy in front of Stowage puts the
//! authenticated username in the `X-Remote-User` header.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::sync::Arc;

use crate::file::path::validate_username;
use crate::web::error::ApiError;
use crate::web::handlers::AppState;

/// Header carrying the authenticated username.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Username from the identity header, if present and non-empty.
pub fn remote_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REMOTE_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extractor for the authenticated user.
///
/// Rejects with 401 when the identity header is missing and 400 when it
/// does not hold a valid username.
#[derive(Debug, Clone)]
pub struct RemoteUser(pub String);

impl<S> FromRequestParts<S> for RemoteUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let username = remote_user(&parts.headers)
                .ok_or_else(|| ApiError::unauthorized("Missing authenticated user"))?;

            validate_username(&username).map_err(|e| {
                tracing::debug!("Rejected identity header: {}", e);
                ApiError::bad_request("Invalid username")
            })?;

            Ok(RemoteUser(username))
        })
    }
}

/// Extractor for users listed in `server.admin_users`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let RemoteUser(username) = RemoteUser::from_request_parts(parts, state).await?;

            if !state.is_admin(&username) {
                tracing::warn!(user = %username, "Admin access denied");
                return Err(ApiError::forbidden("Administrator access required"));
            }

            Ok(AdminUser(username))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_remote_user() {
        let mut headers = HeaderMap::new();
        assert_eq!(remote_user(&headers), None);

        headers.insert(REMOTE_USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(remote_user(&headers), None);

        headers.insert(REMOTE_USER_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(remote_user(&headers), Some("alice".to_string()));
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Remote-User", HeaderValue::from_static("bob"));
        assert_eq!(remote_user(&headers), Some("bob".to_string()));
    }
}
