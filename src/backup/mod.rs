//! Scheduled backups of the metadata database and storage tree.
//!
//! A backup is either a `.tar.gz` archive or a plain directory named
//! `backup_<YYYY-MM-DD>_<HHMMSS>` in the backup directory, containing:
//! ```text
//! metadata.db      point-in-time snapshot of the database
//! storage/...      copy of every user's tree
//! ```
//! Every attempt appends one line to `backup-history.log` next to the
//! archives.

mod archive;
mod history;
mod scheduler;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::BackupConfig;
use crate::datetime::{next_daily_at, parse_timezone};
use crate::db::Database;

pub use scheduler::BackupScheduler;

/// Name prefix identifying backups in the backup directory.
pub const BACKUP_PREFIX: &str = "backup_";

/// Extension of compressed backups.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Append-only log of backup attempts.
pub const HISTORY_FILE: &str = "backup-history.log";

/// Name of the database snapshot inside a backup.
pub const DATABASE_ENTRY: &str = "metadata.db";

/// Name of the storage tree inside a backup.
pub const STORAGE_ENTRY: &str = "storage";

/// Immutable backup configuration.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub schedule_hour: u32,
    pub schedule_minute: u32,
    pub timezone: Tz,
    pub retention_days: u32,
    pub include_database: bool,
    pub include_storage: bool,
    pub compress: bool,
}

impl BackupSettings {
    /// Daily schedule as `HH:MM`.
    pub fn schedule(&self) -> String {
        format!("{:02}:{:02}", self.schedule_hour, self.schedule_minute)
    }

    /// Next scheduled run strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_daily_at(now, self.timezone, self.schedule_hour, self.schedule_minute)
    }

    /// Age after which a backup is pruned, or `None` to keep everything.
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0)
            .then(|| Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60))
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self::from(&BackupConfig::default())
    }
}

impl From<&BackupConfig> for BackupSettings {
    fn from(config: &BackupConfig) -> Self {
        Self {
            enabled: config.enabled,
            dir: PathBuf::from(&config.dir),
            schedule_hour: config.schedule_hour,
            schedule_minute: config.schedule_minute,
            timezone: parse_timezone(&config.timezone),
            retention_days: config.retention_days,
            include_database: config.include_database,
            include_storage: config.include_storage,
            compress: config.compress,
        }
    }
}

/// What a backup reads from.
#[derive(Debug, Clone)]
pub struct BackupSources {
    /// Metadata database to snapshot.
    pub database: Database,
    /// Root of the user storage trees.
    pub storage_dir: PathBuf,
}

/// Outcome of one backup attempt.
#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub success: bool,
    /// Published archive, if the attempt succeeded.
    pub path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Number of regular files written (database snapshot included).
    pub files_count: u64,
    /// Size of the archive in bytes.
    pub size: u64,
    pub error: Option<String>,
}

impl BackupResult {
    /// Wall-clock duration of the attempt.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// An existing backup in the backup directory.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub size: u64,
    pub size_display: String,
    pub created_at: DateTime<Utc>,
    pub is_dir: bool,
}

/// Scheduler state for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub enabled: bool,
    pub running: bool,
    pub schedule: String,
    pub timezone: String,
    pub retention_days: u32,
    pub backup_dir: String,
    pub compressed: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_result: Option<BackupResult>,
    pub next_run: Option<DateTime<Utc>>,
}
