//! Stowage - personal multi-user file storage.
//!
//! Each user owns a private tree of files and folders. The pieces:
//! - [`lock::UserLockRegistry`]: per-user reader-writer locks
//! - [`cache::DirectoryCache`]: short-lived listings and folder-size aggregates
//! - [`rate_limit::ActionRateLimiter`]: sliding-window upload admission
//! - [`backup::BackupScheduler`]: daily archives with retention
//! - [`file::FileService`]: the storage operations tying them together
//! - [`web`]: the HTTP surface

pub mod backup;
pub mod cache;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod file;
pub mod format;
pub mod lock;
pub mod logging;
pub mod rate_limit;
pub mod web;

pub use backup::{BackupResult, BackupScheduler, BackupSettings, BackupSources};
pub use cache::DirectoryCache;
pub use config::Config;
pub use db::Database;
pub use error::{Result, StowageError};
pub use file::{FileService, FileStorage};
pub use lock::UserLockRegistry;
pub use rate_limit::{ActionRateLimiter, RateLimitConfig, RateLimitResult};
