//! File service for Stowage.
//!
//! Every operation follows the same protocol:
//! 1. take the user's lock (exclusive for mutations, shared for reads)
//! 2. touch storage and metadata
//! 3. for mutations, invalidate the user's cache entries before the lock
//!    is released
//!
//! A read that starts after a mutation has returned therefore never sees a
//! listing cached before that mutation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{folder_key, listing_key, DirectoryCache};
use crate::datetime::to_rfc3339;
use crate::db::Database;
use crate::format::format_size_i64;
use crate::lock::UserLockRegistry;
use crate::{Result, StowageError};

use super::metadata::{FileRecord, FileRepository, NewFileRecord};
use super::path::{
    is_within, join, normalize_folder, normalize_path, validate_name, validate_username,
};
use super::storage::FileStorage;
use super::{FileCategory, DEFAULT_MAX_FILE_SIZE, RECENT_FILES_LIMIT};

/// One row of a folder listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the user's root.
    pub path: String,
    pub is_dir: bool,
    /// File size, or the folder's aggregate size for folders.
    pub size: i64,
    pub size_display: String,
    pub mime_type: Option<String>,
    pub is_image: bool,
    /// RFC 3339 modification time.
    pub modified_at: String,
}

impl FileEntry {
    fn from_record(record: &FileRecord, size: i64) -> Self {
        Self {
            name: record.name.clone(),
            path: record.path.clone(),
            is_dir: record.is_dir,
            size,
            size_display: format_size_i64(size),
            mime_type: record.mime_type.clone(),
            is_image: !record.is_dir && super::is_image(&record.name),
            modified_at: to_rfc3339(&record.modified_at),
        }
    }
}

impl From<&FileRecord> for FileEntry {
    fn from(record: &FileRecord) -> Self {
        Self::from_record(record, record.size)
    }
}

/// A folder listing as stored in the directory cache.
pub type Listing = Arc<Vec<FileEntry>>;

/// Result of a file download.
#[derive(Debug)]
pub struct Download {
    /// File metadata.
    pub record: FileRecord,
    /// File content.
    pub content: Vec<u8>,
}

/// Usage of one file category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: FileCategory,
    pub size: i64,
    pub size_display: String,
    pub count: i64,
    /// Share of the user's total bytes, 0-100.
    pub percentage: f64,
}

/// Storage usage summary for one user.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_size: i64,
    pub total_size_display: String,
    pub file_count: i64,
    pub folder_count: i64,
    /// Categories with at least one file.
    pub categories: Vec<CategoryStats>,
    /// Most recently uploaded files.
    pub recent_files: Vec<FileEntry>,
}

/// Per-user file operations.
///
/// Clones share the same lock registry and cache.
#[derive(Clone)]
pub struct FileService {
    db: Database,
    storage: FileStorage,
    locks: Arc<UserLockRegistry>,
    cache: Arc<DirectoryCache<Listing>>,
    max_file_size: u64,
}

impl FileService {
    /// Create a new FileService.
    pub fn new(
        db: Database,
        storage: FileStorage,
        locks: Arc<UserLockRegistry>,
        cache: Arc<DirectoryCache<Listing>>,
    ) -> Self {
        Self {
            db,
            storage,
            locks,
            cache,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Set the maximum accepted upload size in bytes.
    pub fn with_max_file_size(mut self, max_size: u64) -> Self {
        self.max_file_size = max_size;
        self
    }

    /// The lock registry guarding user trees.
    pub fn locks(&self) -> &Arc<UserLockRegistry> {
        &self.locks
    }

    /// The listing and folder-size cache.
    pub fn cache(&self) -> &Arc<DirectoryCache<Listing>> {
        &self.cache
    }

    /// The underlying file storage.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    /// Store a new file in `folder`.
    ///
    /// Fails with `Conflict` if an entry with the same name already exists
    /// in metadata or on disk.
    pub async fn upload(
        &self,
        username: &str,
        folder: &str,
        name: &str,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> Result<FileRecord> {
        validate_username(username)?;
        let folder = normalize_folder(folder)?;
        let name = validate_name(name)?;

        if content.len() as u64 > self.max_file_size {
            let max_mb = self.max_file_size / 1024 / 1024;
            return Err(StowageError::Validation(format!(
                "file is too large (max {max_mb} MB)"
            )));
        }

        let rel = join(&folder, &name);
        let mime_type = match mime_type {
            Some(m) if !m.is_empty() && m != "application/octet-stream" => m.to_string(),
            _ => mime_guess::from_path(&name)
                .first_or_octet_stream()
                .to_string(),
        };

        let _guard = self.locks.write(username).await;
        let repo = FileRepository::new(self.db.pool());

        self.ensure_folder(&repo, username, &folder).await?;
        if repo.exists(username, &rel).await? || self.storage.exists(username, &rel).await? {
            return Err(StowageError::Conflict(format!("{rel} already exists")));
        }

        self.storage.save(username, &rel, content).await?;

        let new_record =
            NewFileRecord::file(username, &folder, &name, content.len() as i64, mime_type);
        let record = match repo.create(&new_record).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.storage.remove(username, &rel).await {
                    warn!(user = %username, path = %rel, error = %cleanup, "Failed to remove orphaned upload");
                }
                return Err(e);
            }
        };

        // Drops the folder-size aggregates as well; they are recalculated
        // on the next read instead of adjusted by delta.
        self.cache.invalidate_user(username);
        info!(user = %username, path = %rel, size = record.size, "File uploaded");
        Ok(record)
    }

    /// Create a folder named `name` inside `parent`.
    pub async fn create_folder(&self, username: &str, parent: &str, name: &str) -> Result<FileRecord> {
        validate_username(username)?;
        let parent = normalize_folder(parent)?;
        let name = validate_name(name)?;
        let rel = join(&parent, &name);

        let _guard = self.locks.write(username).await;
        let repo = FileRepository::new(self.db.pool());

        self.ensure_folder(&repo, username, &parent).await?;
        if repo.exists(username, &rel).await? || self.storage.exists(username, &rel).await? {
            return Err(StowageError::Conflict(format!("{rel} already exists")));
        }

        self.storage.create_dir(username, &rel).await?;

        let record = match repo.create(&NewFileRecord::folder(username, &parent, &name)).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.storage.remove(username, &rel).await {
                    warn!(user = %username, path = %rel, error = %cleanup, "Failed to remove orphaned folder");
                }
                return Err(e);
            }
        };

        self.cache.invalidate_user(username);
        info!(user = %username, path = %rel, "Folder created");
        Ok(record)
    }

    /// Delete a file, or a folder with everything below it.
    ///
    /// Returns the removed entry.
    pub async fn delete(&self, username: &str, path: &str) -> Result<FileRecord> {
        validate_username(username)?;
        let path = normalize_path(path)?;

        let _guard = self.locks.write(username).await;
        let repo = FileRepository::new(self.db.pool());

        let record = repo
            .get_by_path(username, &path)
            .await?
            .ok_or_else(|| StowageError::NotFound(path.clone()))?;

        let rows = repo.delete_tree(username, &path).await?;
        let removed = self.storage.remove(username, &path).await;

        // Metadata already changed, so drop cached state even if the disk
        // removal failed.
        self.cache.invalidate_user(username);

        if !removed? {
            warn!(user = %username, path = %path, "Deleted entry was missing on disk");
        }
        info!(user = %username, path = %path, rows, "Entry deleted");
        Ok(record)
    }

    /// Move an entry into `target_folder`, keeping its name.
    ///
    /// The disk rename is rolled back if the metadata update fails.
    pub async fn move_entry(
        &self,
        username: &str,
        path: &str,
        target_folder: &str,
    ) -> Result<FileRecord> {
        validate_username(username)?;
        let path = normalize_path(path)?;
        let target_folder = normalize_folder(target_folder)?;

        let _guard = self.locks.write(username).await;
        let repo = FileRepository::new(self.db.pool());

        let record = repo
            .get_by_path(username, &path)
            .await?
            .ok_or_else(|| StowageError::NotFound(path.clone()))?;
        self.ensure_folder(&repo, username, &target_folder).await?;

        if record.is_dir && !target_folder.is_empty() && is_within(&target_folder, &path) {
            return Err(StowageError::Validation(format!(
                "cannot move {path} into itself"
            )));
        }

        let new_path = join(&target_folder, &record.name);
        if new_path == record.path {
            return Ok(record);
        }
        if repo.exists(username, &new_path).await?
            || self.storage.exists(username, &new_path).await?
        {
            return Err(StowageError::Conflict(format!("{new_path} already exists")));
        }

        self.storage.rename(username, &path, &new_path).await?;

        if let Err(e) = repo
            .move_tree(username, &path, &target_folder, &new_path)
            .await
        {
            if let Err(rollback) = self.storage.rename(username, &new_path, &path).await {
                error!(
                    user = %username,
                    from = %path,
                    to = %new_path,
                    error = %rollback,
                    "Failed to roll back move; disk and metadata disagree"
                );
            }
            return Err(e);
        }

        self.cache.invalidate_user(username);
        info!(user = %username, from = %path, to = %new_path, "Entry moved");

        repo.get_by_path(username, &new_path)
            .await?
            .ok_or(StowageError::NotFound(new_path))
    }

    /// List the direct children of `folder`, folders first.
    ///
    /// Served from the cache while fresh; otherwise rebuilt from metadata
    /// and cached.
    pub async fn list(&self, username: &str, folder: &str) -> Result<Listing> {
        validate_username(username)?;
        let folder = normalize_folder(folder)?;

        let _guard = self.locks.read(username).await;

        let key = listing_key(username, &folder);
        if let Some(listing) = self.cache.get(&key) {
            debug!(user = %username, folder = %folder, "Listing served from cache");
            return Ok(listing);
        }

        let repo = FileRepository::new(self.db.pool());
        self.ensure_folder(&repo, username, &folder).await?;

        let children = repo.list_children(username, &folder).await?;
        let mut entries = Vec::with_capacity(children.len());
        for record in &children {
            let size = if record.is_dir {
                self.aggregate_size(&repo, username, &record.path).await?
            } else {
                record.size
            };
            entries.push(FileEntry::from_record(record, size));
        }

        let listing: Listing = Arc::new(entries);
        self.cache.put(key, Arc::clone(&listing));
        Ok(listing)
    }

    /// Total bytes stored below `folder` (`""` for the whole tree).
    pub async fn folder_size(&self, username: &str, folder: &str) -> Result<i64> {
        validate_username(username)?;
        let folder = normalize_folder(folder)?;

        let _guard = self.locks.read(username).await;
        let repo = FileRepository::new(self.db.pool());

        self.ensure_folder(&repo, username, &folder).await?;
        self.aggregate_size(&repo, username, &folder).await
    }

    /// Read a file's metadata and content.
    pub async fn download(&self, username: &str, path: &str) -> Result<Download> {
        validate_username(username)?;
        let path = normalize_path(path)?;

        let _guard = self.locks.read(username).await;
        let repo = FileRepository::new(self.db.pool());

        let record = repo
            .get_by_path(username, &path)
            .await?
            .ok_or_else(|| StowageError::NotFound(path.clone()))?;
        if record.is_dir {
            return Err(StowageError::Validation(format!("{path} is a folder")));
        }

        let content = self.storage.load(username, &path).await?;
        Ok(Download { record, content })
    }

    /// Read an image file for inline display.
    pub async fn thumbnail(&self, username: &str, path: &str) -> Result<Download> {
        let name = path.rsplit('/').next().unwrap_or(path);
        if !super::is_image(name) {
            return Err(StowageError::Validation(format!("{path} is not an image")));
        }
        self.download(username, path).await
    }

    /// Every folder the user has, as move targets.
    pub async fn list_folders(&self, username: &str) -> Result<Vec<String>> {
        validate_username(username)?;

        let _guard = self.locks.read(username).await;
        FileRepository::new(self.db.pool())
            .list_folders(username)
            .await
    }

    /// Usage summary: totals, per-category breakdown and recent uploads.
    pub async fn storage_stats(&self, username: &str) -> Result<StorageStats> {
        validate_username(username)?;

        let _guard = self.locks.read(username).await;
        let repo = FileRepository::new(self.db.pool());

        let files = repo.list_files(username).await?;
        let (file_count, folder_count) = repo.count(username).await?;
        let recent = repo.recent_files(username, RECENT_FILES_LIMIT).await?;

        let mut by_category: HashMap<FileCategory, (i64, i64)> = HashMap::new();
        let mut total_size = 0i64;
        for file in &files {
            total_size += file.size;
            let slot = by_category
                .entry(FileCategory::from_name(&file.name))
                .or_default();
            slot.0 += file.size;
            slot.1 += 1;
        }

        let categories = FileCategory::ALL
            .iter()
            .filter_map(|category| {
                let (size, count) = by_category.get(category).copied()?;
                let percentage = if total_size > 0 {
                    size as f64 / total_size as f64 * 100.0
                } else {
                    0.0
                };
                Some(CategoryStats {
                    category: *category,
                    size,
                    size_display: format_size_i64(size),
                    count,
                    percentage,
                })
            })
            .collect();

        Ok(StorageStats {
            total_size,
            total_size_display: format_size_i64(total_size),
            file_count,
            folder_count,
            categories,
            recent_files: recent
                .iter()
                .map(|record| FileEntry::from_record(record, record.size))
                .collect(),
        })
    }

    /// Fail with `NotFound` unless `folder` is the root or an existing folder.
    async fn ensure_folder(
        &self,
        repo: &FileRepository<'_>,
        username: &str,
        folder: &str,
    ) -> Result<()> {
        if folder.is_empty() {
            return Ok(());
        }
        match repo.get_by_path(username, folder).await? {
            Some(record) if record.is_dir => Ok(()),
            _ => Err(StowageError::NotFound(format!("folder {folder}"))),
        }
    }

    /// Folder size from the aggregate, recalculated from metadata when absent.
    ///
    /// Callers hold the user's lock.
    async fn aggregate_size(
        &self,
        repo: &FileRepository<'_>,
        username: &str,
        folder: &str,
    ) -> Result<i64> {
        let key = folder_key(username, folder);
        if let Some(size) = self.cache.get_folder_size(&key) {
            return Ok(size);
        }

        self.cache
            .recalculate_folder_size(&key, || repo.folder_size(username, folder))
            .await
    }
}
