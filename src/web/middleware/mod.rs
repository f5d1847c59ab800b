//! Middleware for Web API.

pub mod auth;
pub mod rate_limit;

pub use auth::{remote_user, AdminUser, RemoteUser, REMOTE_USER_HEADER};
pub use rate_limit::{start_cleanup_task, upload_rate_limit};
