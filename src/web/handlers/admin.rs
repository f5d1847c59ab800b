//! Admin handlers for Web API.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::backup::{BackupInfo, BackupResult, BackupStatus};
use crate::web::dto::ApiResponse;
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AdminUser;

// ============================================================================
// Backups
// ============================================================================

/// GET /api/admin/backups/status - Scheduler state.
pub async fn backup_status(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Json<ApiResponse<BackupStatus>> {
    Json(ApiResponse::new(state.backups.status()))
}

/// GET /api/admin/backups - Existing backups, newest first.
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ApiResponse<Vec<BackupInfo>>>, ApiError> {
    let backups = state.backups.list_backups().await?;
    Ok(Json(ApiResponse::new(backups)))
}

/// POST /api/admin/backups/run - Run a backup now.
///
/// Waits for the attempt to finish. A failed attempt answers 500 with the
/// result in the body.
pub async fn run_backup(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> (StatusCode, Json<ApiResponse<BackupResult>>) {
    tracing::info!(admin = %admin, "Manual backup requested");

    let result = state.backups.run_now().await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(ApiResponse::new(result)))
}
