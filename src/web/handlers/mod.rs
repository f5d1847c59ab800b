//! API handlers for Web UI.

pub mod admin;
pub mod file;

pub use admin::*;
pub use file::*;

use std::sync::Arc;

use crate::backup::BackupScheduler;
use crate::file::{FileService, DEFAULT_MAX_FILE_SIZE};
use crate::rate_limit::ActionRateLimiter;

/// Shared state for all handlers.
pub struct AppState {
    /// Per-user file operations.
    pub files: FileService,
    /// Upload admission control.
    pub upload_limiter: Arc<ActionRateLimiter>,
    /// Backup scheduler for the admin endpoints.
    pub backups: Arc<BackupScheduler>,
    /// Usernames allowed to use the admin endpoints.
    pub admin_users: Vec<String>,
    /// Maximum upload size in bytes.
    pub max_upload_size: u64,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        files: FileService,
        upload_limiter: Arc<ActionRateLimiter>,
        backups: Arc<BackupScheduler>,
    ) -> Self {
        Self {
            files,
            upload_limiter,
            backups,
            admin_users: Vec::new(),
            max_upload_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Set the admin usernames.
    pub fn with_admin_users(mut self, admin_users: Vec<String>) -> Self {
        self.admin_users = admin_users;
        self
    }

    /// Set the maximum upload size in bytes.
    pub fn with_max_upload_size(mut self, max_upload_size: u64) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    /// Whether `username` may use the admin endpoints.
    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_users.iter().any(|admin| admin == username)
    }
}
