//! File metadata types and repository.

use sqlx::SqlitePool;

use crate::{Result, StowageError};

/// Metadata row for a file or folder in a user's tree.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileRecord {
    /// Unique row ID.
    pub id: i64,
    /// Owner of the entry.
    pub username: String,
    /// Display name (last path component).
    pub name: String,
    /// Path relative to the user's root.
    pub path: String,
    /// Containing folder, `""` for the root.
    pub parent: String,
    /// Size in bytes, 0 for folders.
    pub size: i64,
    /// Whether this entry is a folder.
    pub is_dir: bool,
    /// MIME type for files.
    pub mime_type: Option<String>,
    /// Creation time (UTC, `YYYY-MM-DD HH:MM:SS`).
    pub created_at: String,
    /// Last modification time (UTC, `YYYY-MM-DD HH:MM:SS`).
    pub modified_at: String,
}

/// Data for creating a new metadata row.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub username: String,
    pub name: String,
    pub path: String,
    pub parent: String,
    pub size: i64,
    pub is_dir: bool,
    pub mime_type: Option<String>,
}

impl NewFileRecord {
    /// Metadata for a regular file.
    pub fn file(
        username: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        size: i64,
        mime_type: impl Into<String>,
    ) -> Self {
        let parent = parent.into();
        let name = name.into();
        Self {
            username: username.into(),
            path: super::path::join(&parent, &name),
            name,
            parent,
            size,
            is_dir: false,
            mime_type: Some(mime_type.into()),
        }
    }

    /// Metadata for a folder.
    pub fn folder(
        username: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let parent = parent.into();
        let name = name.into();
        Self {
            username: username.into(),
            path: super::path::join(&parent, &name),
            name,
            parent,
            size: 0,
            is_dir: true,
            mime_type: None,
        }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, username, name, path, parent, size, is_dir, mime_type, created_at, modified_at
     FROM files";

/// Escape `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
fn like_prefix(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len() + 2);
    for c in path.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push_str("/%");
    escaped
}

/// Repository for file metadata operations.
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    /// Create a new FileRepository with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new entry.
    ///
    /// Returns `Conflict` if the user already has an entry at the same path.
    pub async fn create(&self, record: &NewFileRecord) -> Result<FileRecord> {
        let result = sqlx::query(
            "INSERT INTO files (username, name, path, parent, size, is_dir, mime_type)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.username)
        .bind(&record.name)
        .bind(&record.path)
        .bind(&record.parent)
        .bind(record.size)
        .bind(record.is_dir)
        .bind(&record.mime_type)
        .execute(self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StowageError::Conflict(format!("{} already exists", record.path))
            }
            e => StowageError::Database(e.to_string()),
        })?;

        let id = result.last_insert_rowid();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))
    }

    /// Get an entry by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Get an entry by its user-relative path.
    pub async fn get_by_path(&self, username: &str, path: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE username = ? AND path = ?"
        ))
        .bind(username)
        .bind(path)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Check whether an entry exists at `path`.
    pub async fn exists(&self, username: &str, path: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE username = ? AND path = ?)")
                .bind(username)
                .bind(path)
                .fetch_one(self.pool)
                .await?;

        Ok(exists)
    }

    /// List the direct children of a folder, folders first.
    pub async fn list_children(&self, username: &str, parent: &str) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE username = ? AND parent = ?
             ORDER BY is_dir DESC, name COLLATE NOCASE, name"
        ))
        .bind(username)
        .bind(parent)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// List every folder path the user has, sorted.
    pub async fn list_folders(&self, username: &str) -> Result<Vec<String>> {
        let folders: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM files WHERE username = ? AND is_dir = 1 ORDER BY path",
        )
        .bind(username)
        .fetch_all(self.pool)
        .await?;

        Ok(folders)
    }

    /// List every regular file the user has.
    pub async fn list_files(&self, username: &str) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE username = ? AND is_dir = 0 ORDER BY path"
        ))
        .bind(username)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Most recently created regular files, newest first.
    pub async fn recent_files(&self, username: &str, limit: i64) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} WHERE username = ? AND is_dir = 0
             ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(username)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Delete an entry and, for folders, everything below it.
    ///
    /// Returns the number of rows removed.
    pub async fn delete_tree(&self, username: &str, path: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM files
             WHERE username = ? AND (path = ? OR path LIKE ? ESCAPE '\\')",
        )
        .bind(username)
        .bind(path)
        .bind(like_prefix(path))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Move an entry (and its descendants) from `from` to `to` inside `new_parent`.
    ///
    /// Runs in one transaction; returns the number of rows updated.
    pub async fn move_tree(
        &self,
        username: &str,
        from: &str,
        new_parent: &str,
        to: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE files SET path = ?, parent = ?, modified_at = datetime('now')
             WHERE username = ? AND path = ?",
        )
        .bind(to)
        .bind(new_parent)
        .bind(username)
        .bind(from)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if moved == 0 {
            return Err(StowageError::NotFound(from.to_string()));
        }

        let offset = from.chars().count() as i64 + 1;
        let descendants = sqlx::query(
            "UPDATE files
             SET path = ? || substr(path, ?), parent = ? || substr(parent, ?)
             WHERE username = ? AND path LIKE ? ESCAPE '\\'",
        )
        .bind(to)
        .bind(offset)
        .bind(to)
        .bind(offset)
        .bind(username)
        .bind(like_prefix(from))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(moved + descendants)
    }

    /// Total bytes of regular files within `folder` (recursively).
    ///
    /// `""` sums the whole tree.
    pub async fn folder_size(&self, username: &str, folder: &str) -> Result<i64> {
        let size: i64 = if folder.is_empty() {
            sqlx::query_scalar(
                "SELECT COALESCE(SUM(size), 0) FROM files WHERE username = ? AND is_dir = 0",
            )
            .bind(username)
            .fetch_one(self.pool)
            .await?
        } else {
            sqlx::query_scalar(
                "SELECT COALESCE(SUM(size), 0) FROM files
                 WHERE username = ? AND is_dir = 0 AND path LIKE ? ESCAPE '\\'",
            )
            .bind(username)
            .bind(like_prefix(folder))
            .fetch_one(self.pool)
            .await?
        };

        Ok(size)
    }

    /// Count the user's files and folders.
    pub async fn count(&self, username: &str) -> Result<(i64, i64)> {
        let (files, folders): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(is_dir = 0), 0), COALESCE(SUM(is_dir = 1), 0)
             FROM files WHERE username = ?",
        )
        .bind(username)
        .fetch_one(self.pool)
        .await?;

        Ok((files, folders))
    }
}
