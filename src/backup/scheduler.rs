//! Daily backup scheduler.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::{self, ArchiveSummary};
use super::history;
use super::{
    BackupInfo, BackupResult, BackupSettings, BackupSources, BackupStatus, ARCHIVE_EXTENSION,
    BACKUP_PREFIX,
};
use crate::datetime::{format_in, DISPLAY_FORMAT};
use crate::format::format_size;
use crate::{Result, StowageError};

/// Timestamp part of a backup name.
const NAME_FORMAT: &str = "%Y-%m-%d_%H%M%S";

#[derive(Default)]
struct SchedulerState {
    running: bool,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    last_result: Option<BackupResult>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Runs a backup every day at the configured local time.
///
/// The scheduler is shared behind an [`Arc`]; [`start`](Self::start) spawns
/// the background loop and [`stop`](Self::stop) cancels it and waits for it
/// to exit. Attempts (scheduled or manual) never overlap.
pub struct BackupScheduler {
    settings: BackupSettings,
    sources: BackupSources,
    state: Mutex<SchedulerState>,
    run_lock: tokio::sync::Mutex<()>,
}

impl BackupScheduler {
    /// Create a scheduler. The backup directory is created if possible;
    /// failing that only logs, and each attempt retries it.
    pub fn new(settings: BackupSettings, sources: BackupSources) -> Arc<Self> {
        if settings.enabled {
            if let Err(e) = std::fs::create_dir_all(&settings.dir) {
                warn!(
                    dir = %settings.dir.display(),
                    error = %e,
                    "Failed to create backup directory"
                );
            }
        }

        Arc::new(Self {
            settings,
            sources,
            state: Mutex::new(SchedulerState::default()),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the background loop is active.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Start the background loop. Calling it again while running is a no-op.
    ///
    /// If the backup directory holds no backup yet, one is taken right away.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state();
        if state.running {
            debug!("Backup scheduler already running");
            return;
        }
        if !self.settings.enabled {
            info!("Backup service is disabled");
            return;
        }

        let token = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        state.task = Some(tokio::spawn(async move {
            scheduler.run_loop(loop_token).await;
        }));
        state.cancel = Some(token);
        state.running = true;

        info!(
            schedule = %self.settings.schedule(),
            timezone = %self.settings.timezone,
            retention_days = self.settings.retention_days,
            dir = %self.settings.dir.display(),
            "Backup scheduler started"
        );
    }

    /// Stop the background loop and wait for it to exit.
    ///
    /// An attempt already in progress is allowed to finish.
    pub async fn stop(&self) {
        let (token, task) = {
            let mut state = self.state();
            if !state.running {
                return;
            }
            state.running = false;
            (state.cancel.take(), state.task.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Backup loop terminated abnormally");
            }
        }

        info!("Backup scheduler stopped");
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        if !self.has_existing_backup() && !token.is_cancelled() {
            info!("No existing backup found, running initial backup");
            self.run_now().await;
        }

        loop {
            let now = Utc::now();
            let next = self.settings.next_run_after(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                next_run = %format_in(&next, self.settings.timezone, DISPLAY_FORMAT),
                "Next backup scheduled"
            );

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.run_now().await;
                }
            }
        }

        debug!("Backup loop exited");
    }

    /// Run one backup, then prune expired backups if it succeeded.
    pub async fn run_now(&self) -> BackupResult {
        let result = self.run_backup().await;
        if result.success {
            self.clean_old_backups().await;
        }
        result
    }

    /// Run one backup attempt.
    ///
    /// Failures are reported in the result (and the history log), never
    /// returned as errors. A failed attempt leaves nothing under a
    /// `backup_` name.
    pub async fn run_backup(&self) -> BackupResult {
        let _serial = self.run_lock.lock().await;

        let started_at = Utc::now();
        info!("Starting backup");
        let outcome = self.create_backup(started_at).await;
        let finished_at = Utc::now();

        let result = match outcome {
            Ok((path, summary)) => BackupResult {
                success: true,
                path: Some(path),
                started_at,
                finished_at,
                files_count: summary.files,
                size: summary.size,
                error: None,
            },
            Err(e) => BackupResult {
                success: false,
                path: None,
                started_at,
                finished_at,
                files_count: 0,
                size: 0,
                error: Some(e.to_string()),
            },
        };

        match (&result.path, &result.error) {
            (Some(path), _) => info!(
                path = %path.display(),
                files = result.files_count,
                size = %format_size(result.size),
                duration_ms = result.duration().as_millis() as u64,
                "Backup completed"
            ),
            (None, error) => error!(error = error.as_deref().unwrap_or("unknown"), "Backup failed"),
        }

        {
            let mut state = self.state();
            if result.success {
                state.last_success = Some(started_at);
                state.last_error = None;
            } else {
                state.last_error = result.error.clone();
            }
            state.last_result = Some(result.clone());
        }

        if let Err(e) = history::append(&self.settings.dir, &result, self.settings.timezone).await
        {
            warn!(error = %e, "Failed to write backup history");
        }

        result
    }

    async fn create_backup(&self, started_at: DateTime<Utc>) -> Result<(PathBuf, ArchiveSummary)> {
        if !self.settings.include_database && !self.settings.include_storage {
            return Err(StowageError::Backup(
                "nothing to back up: database and storage are both excluded".to_string(),
            ));
        }
        fs::create_dir_all(&self.settings.dir).await?;

        let stem = format!(
            "{BACKUP_PREFIX}{}",
            format_in(&started_at, self.settings.timezone, NAME_FORMAT)
        );
        let name = self.available_name(&stem);
        let final_path = self.settings.dir.join(&name);
        let staging = self.settings.dir.join(format!(".tmp-{name}"));
        let snapshot = self.settings.dir.join(format!(".tmp-{name}.db"));

        let written = self.write_staging(&staging, &snapshot).await;
        let _ = fs::remove_file(&snapshot).await;

        let summary = match written {
            Ok(summary) => summary,
            Err(e) => {
                let _ = remove_path(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &final_path).await {
            let _ = remove_path(&staging).await;
            return Err(e.into());
        }

        Ok((final_path, summary))
    }

    async fn write_staging(&self, staging: &Path, snapshot: &Path) -> Result<ArchiveSummary> {
        let database = if self.settings.include_database {
            let _ = fs::remove_file(snapshot).await;
            self.sources.database.snapshot_to(snapshot).await?;
            Some(snapshot.to_path_buf())
        } else {
            None
        };
        let storage = self
            .settings
            .include_storage
            .then(|| self.sources.storage_dir.clone());
        let staging = staging.to_path_buf();
        let compress = self.settings.compress;

        tokio::task::spawn_blocking(move || {
            if compress {
                archive::write_tar_gz(&staging, database.as_deref(), storage.as_deref())
            } else {
                archive::write_directory(&staging, database.as_deref(), storage.as_deref())
            }
        })
        .await
        .map_err(|e| StowageError::Backup(format!("archive task failed: {e}")))?
    }

    /// Backup name for `stem`, suffixed if an attempt in the same second exists.
    fn available_name(&self, stem: &str) -> String {
        let with_extension = |base: &str| {
            if self.settings.compress {
                format!("{base}.{ARCHIVE_EXTENSION}")
            } else {
                base.to_string()
            }
        };

        let mut name = with_extension(stem);
        let mut n = 2;
        while self.settings.dir.join(&name).exists() {
            name = with_extension(&format!("{stem}-{n}"));
            n += 1;
        }
        name
    }

    fn has_existing_backup(&self) -> bool {
        std::fs::read_dir(&self.settings.dir)
            .map(|entries| {
                entries.flatten().any(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with(BACKUP_PREFIX))
                })
            })
            .unwrap_or(false)
    }

    /// Delete backups whose modification time is older than the retention
    /// period. Returns the number removed.
    pub async fn clean_old_backups(&self) -> usize {
        let Some(retention) = self.settings.retention() else {
            return 0;
        };
        let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
            return 0;
        };

        let mut entries = match fs::read_dir(&self.settings.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read backup directory");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read backup directory entry");
                    break;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(BACKUP_PREFIX) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(name, error = %e, "Failed to stat backup");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match remove_path(&entry.path()).await {
                Ok(()) => {
                    info!(name, "Removed expired backup");
                    removed += 1;
                }
                Err(e) => warn!(name, error = %e, "Failed to remove expired backup"),
            }
        }

        removed
    }

    /// Existing backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let dir = self.settings.dir.clone();
        tokio::task::spawn_blocking(move || list_dir(&dir))
            .await
            .map_err(|e| StowageError::Backup(format!("listing task failed: {e}")))?
    }

    pub fn status(&self) -> BackupStatus {
        let state = self.state();
        let settings = &self.settings;

        BackupStatus {
            enabled: settings.enabled,
            running: state.running,
            schedule: settings.schedule(),
            timezone: settings.timezone.to_string(),
            retention_days: settings.retention_days,
            backup_dir: settings.dir.display().to_string(),
            compressed: settings.compress,
            last_success: state.last_success,
            last_error: state.last_error.clone(),
            last_result: state.last_result.clone(),
            next_run: (settings.enabled && state.running)
                .then(|| settings.next_run_after(Utc::now())),
        }
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(m) if m.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn list_dir(dir: &Path) -> Result<Vec<BackupInfo>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(BACKUP_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        let is_dir = metadata.is_dir();
        let size = if is_dir {
            archive::tree_size(&entry.path())
        } else {
            metadata.len()
        };

        backups.push(BackupInfo {
            name,
            size,
            size_display: format_size(size),
            created_at: DateTime::<Utc>::from(metadata.modified()?),
            is_dir,
        });
    }

    backups.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::HISTORY_FILE;
    use crate::db::Database;
    use tempfile::TempDir;

    const DAY: u64 = 24 * 60 * 60;

    async fn setup(compress: bool) -> (TempDir, Arc<BackupScheduler>) {
        let temp = TempDir::new().unwrap();
        let storage_dir = temp.path().join("storage");
        std::fs::create_dir_all(storage_dir.join("alice")).unwrap();
        std::fs::write(storage_dir.join("alice/a.txt"), b"hello").unwrap();

        let settings = BackupSettings {
            dir: temp.path().join("backups"),
            compress,
            ..BackupSettings::default()
        };
        let sources = BackupSources {
            database: database(&temp).await,
            storage_dir,
        };

        (temp, BackupScheduler::new(settings, sources))
    }

    async fn database(temp: &TempDir) -> Database {
        Database::open(temp.path().join("meta.db")).await.unwrap()
    }

    fn backup_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    fn age(path: &Path, days: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(days * DAY))
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested/backups");
        let database = database(&temp).await;

        let settings = BackupSettings {
            dir: dir.clone(),
            ..BackupSettings::default()
        };
        let _scheduler = BackupScheduler::new(
            settings,
            BackupSources {
                database,
                storage_dir: temp.path().join("storage"),
            },
        );

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_run_backup_compressed() {
        let (_temp, scheduler) = setup(true).await;

        let result = scheduler.run_backup().await;

        assert!(result.success, "{:?}", result.error);
        let path = result.path.clone().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(BACKUP_PREFIX));
        assert!(name.ends_with(".tar.gz"));
        assert_eq!(result.files_count, 2);
        assert_eq!(result.size, std::fs::metadata(&path).unwrap().len());

        let names = backup_names(&scheduler.settings().dir);
        assert_eq!(names, vec![HISTORY_FILE.to_string(), name.to_string()]);

        let status = scheduler.status();
        assert_eq!(status.last_success, Some(result.started_at));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_run_backup_directory() {
        let (_temp, scheduler) = setup(false).await;

        let result = scheduler.run_backup().await;

        assert!(result.success, "{:?}", result.error);
        let path = result.path.unwrap();
        assert!(path.join("metadata.db").is_file());
        assert_eq!(
            std::fs::read(path.join("storage/alice/a.txt")).unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn test_backups_in_same_second_get_distinct_names() {
        let (_temp, scheduler) = setup(true).await;

        let first = scheduler.run_backup().await;
        let second = scheduler.run_backup().await;

        assert!(first.success && second.success);
        assert_ne!(first.path, second.path);
        assert_eq!(scheduler.list_backups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_no_archive() {
        let (temp, scheduler) = setup(true).await;
        std::fs::remove_dir_all(temp.path().join("storage")).unwrap();

        let result = scheduler.run_backup().await;

        assert!(!result.success);
        assert!(result.path.is_none());
        assert!(result.error.is_some());
        assert_eq!(
            backup_names(&scheduler.settings().dir),
            vec![HISTORY_FILE.to_string()]
        );

        let history =
            std::fs::read_to_string(scheduler.settings().dir.join(HISTORY_FILE)).unwrap();
        assert!(history.contains("FAILED"));
        assert_eq!(scheduler.status().last_error, result.error);
    }

    #[tokio::test]
    async fn test_failed_backup_does_not_prune() {
        let (temp, scheduler) = setup(true).await;
        let old = scheduler.settings().dir.join("backup_2024-01-01_030000.tar.gz");
        std::fs::write(&old, b"x").unwrap();
        age(&old, 8);
        std::fs::remove_dir_all(temp.path().join("storage")).unwrap();

        let result = scheduler.run_now().await;

        assert!(!result.success);
        assert!(old.exists());
    }

    #[tokio::test]
    async fn test_successful_backup_prunes() {
        let (_temp, scheduler) = setup(true).await;
        let old = scheduler.settings().dir.join("backup_2024-01-01_030000.tar.gz");
        std::fs::write(&old, b"x").unwrap();
        age(&old, 8);

        let result = scheduler.run_now().await;

        assert!(result.success, "{:?}", result.error);
        assert!(!old.exists());
        assert_eq!(scheduler.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_includes_dot_and_part_files() {
        let (temp, scheduler) = setup(false).await;
        let alice = temp.path().join("storage/alice");
        std::fs::write(alice.join(".hidden"), b"h").unwrap();
        std::fs::write(alice.join("notes.part"), b"p").unwrap();

        let result = scheduler.run_backup().await;

        assert!(result.success, "{:?}", result.error);
        // metadata.db plus three user files.
        assert_eq!(result.files_count, 4);
        let path = result.path.unwrap();
        assert!(path.join("storage/alice/.hidden").is_file());
        assert!(path.join("storage/alice/notes.part").is_file());
    }

    #[tokio::test]
    async fn test_nothing_included_fails() {
        let temp = TempDir::new().unwrap();
        let settings = BackupSettings {
            dir: temp.path().join("backups"),
            include_database: false,
            include_storage: false,
            ..BackupSettings::default()
        };
        let scheduler = BackupScheduler::new(
            settings,
            BackupSources {
                database: database(&temp).await,
                storage_dir: temp.path().join("storage"),
            },
        );

        assert!(!scheduler.run_backup().await.success);
    }

    #[tokio::test]
    async fn test_clean_old_backups() {
        let (_temp, scheduler) = setup(true).await;
        let dir = scheduler.settings().dir.clone();

        let old = dir.join("backup_2024-01-01_030000.tar.gz");
        let recent = dir.join("backup_2024-01-03_030000.tar.gz");
        let unrelated = dir.join("notes.txt");
        for path in [&old, &recent, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }
        age(&old, 8);
        age(&recent, 6);
        age(&unrelated, 30);

        assert_eq!(scheduler.clean_old_backups().await, 1);

        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let temp = TempDir::new().unwrap();
        let settings = BackupSettings {
            dir: temp.path().join("backups"),
            retention_days: 0,
            ..BackupSettings::default()
        };
        let scheduler = BackupScheduler::new(
            settings,
            BackupSources {
                database: database(&temp).await,
                storage_dir: temp.path().join("storage"),
            },
        );
        let old = scheduler.settings().dir.join("backup_2020-01-01_030000.tar.gz");
        std::fs::write(&old, b"x").unwrap();
        age(&old, 365);

        assert_eq!(scheduler.clean_old_backups().await, 0);
        assert!(old.exists());
    }

    #[tokio::test]
    async fn test_list_backups_newest_first() {
        let (_temp, scheduler) = setup(true).await;
        let dir = scheduler.settings().dir.clone();
        std::fs::write(dir.join("backup_2024-01-01_030000.tar.gz"), b"a").unwrap();
        std::fs::write(dir.join("backup_2024-01-02_030000.tar.gz"), b"bb").unwrap();
        std::fs::create_dir(dir.join("backup_2024-01-03_030000")).unwrap();
        std::fs::write(dir.join("backup_2024-01-03_030000/metadata.db"), b"ccc").unwrap();
        std::fs::write(dir.join(".tmp-backup_2024-01-04_030000.tar.gz"), b"x").unwrap();

        let backups = scheduler.list_backups().await.unwrap();

        let names: Vec<_> = backups.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "backup_2024-01-03_030000",
                "backup_2024-01-02_030000.tar.gz",
                "backup_2024-01-01_030000.tar.gz",
            ]
        );
        assert!(backups[0].is_dir);
        assert_eq!(backups[0].size, 3);
        assert_eq!(backups[1].size, 2);
    }

    #[tokio::test]
    async fn test_list_backups_missing_dir_is_empty() {
        let (_temp, scheduler) = setup(true).await;
        std::fs::remove_dir_all(&scheduler.settings().dir).unwrap();

        assert!(scheduler.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_disabled_is_noop() {
        let temp = TempDir::new().unwrap();
        let settings = BackupSettings {
            enabled: false,
            dir: temp.path().join("backups"),
            ..BackupSettings::default()
        };
        let scheduler = BackupScheduler::new(
            settings,
            BackupSources {
                database: database(&temp).await,
                storage_dir: temp.path().join("storage"),
            },
        );

        scheduler.start();

        assert!(!scheduler.is_running());
        let status = scheduler.status();
        assert!(!status.enabled);
        assert!(status.next_run.is_none());
        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_backup_in_progress() {
        let (temp, scheduler) = setup(true).await;
        let alice = temp.path().join("storage/alice");
        let chunk = vec![7u8; 64 * 1024];
        for i in 0..200 {
            std::fs::write(alice.join(format!("file-{i:03}.bin")), &chunk).unwrap();
        }
        let dir = scheduler.settings().dir.clone();

        scheduler.start();

        // Wait until the bootstrap backup is staged or already published.
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let names = backup_names(&dir);
                if names
                    .iter()
                    .any(|n| n.starts_with(".tmp-") || n.starts_with(BACKUP_PREFIX))
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("bootstrap backup did not start");

        scheduler.stop().await;

        let names = backup_names(&dir);
        let published: Vec<_> = names
            .iter()
            .filter(|n| n.starts_with(BACKUP_PREFIX))
            .collect();
        assert_eq!(published.len(), 1, "{names:?}");
        assert!(!names.iter().any(|n| n.starts_with(".tmp-")), "{names:?}");

        let last = scheduler.status().last_result.unwrap();
        assert!(last.success, "{:?}", last.error);
        assert_eq!(last.files_count, 202);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_joins() {
        let (_temp, scheduler) = setup(true).await;
        std::fs::write(
            scheduler.settings().dir.join("backup_2024-01-01_030000.tar.gz"),
            b"x",
        )
        .unwrap();

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        assert!(scheduler.status().next_run.is_some());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(scheduler.status().next_run.is_none());

        // Existing backup: no bootstrap attempt was made.
        assert_eq!(scheduler.list_backups().await.unwrap().len(), 1);
    }
}
