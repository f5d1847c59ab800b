//! Upload rate limiting middleware.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auth::remote_user;
use crate::rate_limit::{ActionRateLimiter, RateLimitResult};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;

/// How often idle users are dropped from the limiter.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Admit or reject an upload for the requesting user.
///
/// Requests without an identity pass through untouched; the handler's
/// extractor rejects them.
pub async fn upload_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(username) = remote_user(req.headers()) {
        if let RateLimitResult::Denied { retry_after } =
            state.upload_limiter.check_and_record(&username)
        {
            tracing::warn!(
                user = %username,
                retry_after_secs = retry_after.as_secs(),
                "Upload rate limit exceeded"
            );
            return ApiError::too_many_requests(
                "Too many uploads. Please try again later.",
                retry_after,
            )
            .into_response();
        }
    }

    next.run(req).await
}

/// Start a background task that periodically drops idle users from
/// `limiter` until `shutdown` is cancelled.
pub fn start_cleanup_task(
    limiter: Arc<ActionRateLimiter>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    limiter.cleanup();
                    tracing::debug!(
                        tracked_users = limiter.tracked_users(),
                        "Upload limiter cleaned up"
                    );
                }
            }
        }
    })
}
