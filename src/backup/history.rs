//! Append-only log of backup attempts.

use std::path::Path;

use chrono_tz::Tz;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::{BackupResult, HISTORY_FILE};
use crate::datetime::{format_in, DISPLAY_FORMAT};
use crate::format::format_size;
use crate::Result;

/// Render one history line (without the trailing newline).
///
/// ```text
/// [2024-01-15 03:00:00] SUCCESS - Path: backups/backup_2024-01-15_030000.tar.gz, Duration: 2s, Size: 1.50 MB
/// [2024-01-16 03:00:00] FAILED - Path: -, Duration: 0s, Size: 0 B, Error: ...
/// ```
pub(super) fn format_entry(result: &BackupResult, tz: Tz) -> String {
    let status = if result.success { "SUCCESS" } else { "FAILED" };
    let path = result
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut line = format!(
        "[{}] {status} - Path: {path}, Duration: {}s, Size: {}",
        format_in(&result.started_at, tz, DISPLAY_FORMAT),
        result.duration().as_secs(),
        format_size(result.size),
    );
    if let Some(error) = &result.error {
        line.push_str(", Error: ");
        line.push_str(error);
    }
    line
}

/// Append the attempt to the history file in `dir`.
pub(super) async fn append(dir: &Path, result: &BackupResult, tz: Tz) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(HISTORY_FILE))
        .await?;

    let mut line = format_entry(result, tz);
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
