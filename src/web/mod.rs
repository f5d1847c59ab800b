//! HTTP API for Stowage.
//!
//! A thin axum layer over [`crate::file::FileService`] and the backup
//! scheduler. Identity comes from the upstream proxy (see
//! [`middleware::auth`]).

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
