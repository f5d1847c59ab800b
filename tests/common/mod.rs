//! Test helpers for integration tests.
//!
//! Builds the full component stack on a temporary directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use tempfile::TempDir;

use stowage::backup::{BackupScheduler, BackupSettings, BackupSources};
use stowage::web::{create_router, AppState};
use stowage::{
    ActionRateLimiter, Database, DirectoryCache, FileService, FileStorage, RateLimitConfig,
    UserLockRegistry,
};

/// Username with access to the admin endpoints.
pub const ADMIN: &str = "admin";

/// Everything a test needs, kept alive for the test's duration.
pub struct TestApp {
    pub temp: TempDir,
    pub db: Database,
    pub files: FileService,
    pub backups: Arc<BackupScheduler>,
    pub limiter: Arc<ActionRateLimiter>,
}

impl TestApp {
    /// Stack with the default upload limit (10 per 60 seconds).
    pub async fn new() -> Self {
        Self::with_upload_limit(RateLimitConfig::default()).await
    }

    pub async fn with_upload_limit(limit: RateLimitConfig) -> Self {
        Self::build(limit, |settings| settings).await
    }

    /// Stack with customized backup settings.
    pub async fn with_backup_settings(
        customize: impl FnOnce(BackupSettings) -> BackupSettings,
    ) -> Self {
        Self::build(RateLimitConfig::default(), customize).await
    }

    async fn build(
        limit: RateLimitConfig,
        customize: impl FnOnce(BackupSettings) -> BackupSettings,
    ) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        // File-backed so backups can snapshot it.
        let db = Database::open(temp.path().join("stowage.db"))
            .await
            .expect("Failed to create test database");
        let storage =
            FileStorage::new(temp.path().join("storage")).expect("Failed to create storage");

        let files = FileService::new(
            db.clone(),
            storage,
            Arc::new(UserLockRegistry::new()),
            Arc::new(DirectoryCache::default()),
        );

        let settings = customize(BackupSettings {
            enabled: false,
            dir: temp.path().join("backups"),
            ..BackupSettings::default()
        });
        let backups = BackupScheduler::new(
            settings,
            BackupSources {
                database: db.clone(),
                storage_dir: temp.path().join("storage"),
            },
        );

        Self {
            temp,
            db,
            files,
            backups,
            limiter: Arc::new(ActionRateLimiter::new(limit)),
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.temp.path().join("storage")
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backups.settings().dir
    }

    /// HTTP test server over a clone of this stack.
    pub fn server(&self) -> TestServer {
        let state = AppState::new(
            self.files.clone(),
            self.limiter.clone(),
            self.backups.clone(),
        )
        .with_admin_users(vec![ADMIN.to_string()]);

        TestServer::new(create_router(Arc::new(state))).expect("Failed to create test server")
    }
}

/// Identity header for `username`.
pub fn as_user(username: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-remote-user"),
        HeaderValue::from_str(username).expect("Invalid header value"),
    )
}
