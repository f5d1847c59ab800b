//! Router configuration for Web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::dto::HealthResponse;
use super::handlers::{
    backup_status, create_folder, delete_file, download_file, list_backups, list_files,
    list_folders, move_file, run_backup, storage_stats, thumbnail, upload_file, AppState,
};
use super::middleware::upload_rate_limit;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the main API router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(app_state.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    // Upload is admitted by the rate limiter before the body is read
    let upload_routes = Router::new()
        .route("/files/upload", post(upload_file))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            upload_rate_limit,
        ))
        .layer(DefaultBodyLimit::max(body_limit));

    let file_routes = Router::new()
        .route("/files", get(list_files).delete(delete_file))
        .route("/files/download", get(download_file))
        .route("/files/thumbnail", get(thumbnail))
        .route("/files/move", post(move_file))
        .route("/folders", get(list_folders).post(create_folder))
        .route("/stats", get(storage_stats))
        .merge(upload_routes);

    let admin_routes = Router::new()
        .route("/backups", get(list_backups))
        .route("/backups/status", get(backup_status))
        .route("/backups/run", post(run_backup));

    let api_routes = Router::new()
        .merge(file_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api", api_routes)
        .merge(create_health_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_health_router() {
        let server = TestServer::new(create_health_router::<()>()).unwrap();

        let response = server.get("/health").await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
    }
}
