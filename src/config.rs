//! Configuration module for Stowage.

use serde::Deserialize;
use std::path::Path;

use chrono_tz::Tz;

use crate::{Result, StowageError};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Usernames allowed to use the admin endpoints.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_users: vec![],
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/stowage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per user.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_storage_path() -> String {
    "storage".to_string()
}

fn default_max_upload_size() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

/// Directory listing cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached listing in seconds.
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_secs: u64,
}

fn default_listing_ttl() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listing_ttl_secs: default_listing_ttl(),
        }
    }
}

/// Upload admission configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum uploads per user within the window.
    #[serde(default = "default_max_uploads")]
    pub max_uploads: u32,
    /// Sliding window length in seconds.
    #[serde(default = "default_upload_window")]
    pub window_secs: u64,
}

fn default_max_uploads() -> u32 {
    10
}

fn default_upload_window() -> u64 {
    60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_uploads: default_max_uploads(),
            window_secs: default_upload_window(),
        }
    }
}

/// Scheduled backup configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Whether scheduled backups run at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Destination directory for archives.
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Hour of day (0-23) to run the daily backup.
    #[serde(default = "default_schedule_hour")]
    pub schedule_hour: u32,
    /// Minute (0-59) to run the daily backup.
    #[serde(default)]
    pub schedule_minute: u32,
    /// Timezone the schedule is expressed in (e.g., "Asia/Tokyo", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Days to keep archives before they are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Include a snapshot of the metadata database.
    #[serde(default = "default_true")]
    pub include_database: bool,
    /// Include the storage tree.
    #[serde(default = "default_true")]
    pub include_storage: bool,
    /// Write a `.tar.gz` archive instead of a plain directory copy.
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_true() -> bool {
    true
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

fn default_schedule_hour() -> u32 {
    3
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_retention_days() -> u32 {
    7
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_backup_dir(),
            schedule_hour: default_schedule_hour(),
            schedule_minute: 0,
            timezone: default_timezone(),
            retention_days: default_retention_days(),
            include_database: true,
            include_storage: true,
            compress: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/stowage.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// File storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Listing cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upload rate limiting.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Scheduled backups.
    #[serde(default)]
    pub backup: BackupConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StowageError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StowageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STOWAGE_STORAGE_PATH`: Override the storage root
    /// - `STOWAGE_BACKUP_DIR`: Override the backup destination
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOWAGE_STORAGE_PATH") {
            if !path.is_empty() {
                self.storage.path = path;
            }
        }
        if let Ok(dir) = std::env::var("STOWAGE_BACKUP_DIR") {
            if !dir.is_empty() {
                self.backup.dir = dir;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.backup.schedule_hour > 23 {
            return Err(StowageError::Config(format!(
                "backup.schedule_hour must be 0-23, got {}",
                self.backup.schedule_hour
            )));
        }
        if self.backup.schedule_minute > 59 {
            return Err(StowageError::Config(format!(
                "backup.schedule_minute must be 0-59, got {}",
                self.backup.schedule_minute
            )));
        }
        if self.backup.timezone.parse::<Tz>().is_err() {
            return Err(StowageError::Config(format!(
                "backup.timezone is not a known timezone: {}",
                self.backup.timezone
            )));
        }
        if self.cache.listing_ttl_secs == 0 {
            return Err(StowageError::Config(
                "cache.listing_ttl_secs must be positive".to_string(),
            ));
        }
        if self.upload.max_uploads == 0 || self.upload.window_secs == 0 {
            return Err(StowageError::Config(
                "upload.max_uploads and upload.window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
