//! Error types for Stowage.

use thiserror::Error;

/// Common error type for Stowage.
#[derive(Error, Debug)]
pub enum StowageError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The target of a create or move already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Permission denied error.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backup attempt failed.
    #[error("backup error: {0}")]
    Backup(String),
}

impl From<sqlx::Error> for StowageError {
    fn from(e: sqlx::Error) -> Self {
        StowageError::Database(e.to_string())
    }
}

impl From<walkdir::Error> for StowageError {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => StowageError::Io(io),
            None => StowageError::Backup("filesystem loop detected".to_string()),
        }
    }
}

/// Result type alias for Stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
