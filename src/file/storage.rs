//! Physical storage for user files.
//!
//! Each user owns one directory under the storage root:
//! ```text
//! {base_path}/
//! ├── alice/
//! │   ├── notes.txt
//! │   └── docs/
//! │       └── report.pdf
//! └── bob/
//!     └── ...
//! ```
//! Paths passed in are user-relative and already normalized by
//! [`super::path`].

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use super::{PARTIAL_UPLOAD_PREFIX, PARTIAL_UPLOAD_SUFFIX};
use crate::{Result, StowageError};

/// File storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding `username`'s tree.
    pub fn user_root(&self, username: &str) -> PathBuf {
        self.base_path.join(username)
    }

    /// Absolute location of a user-relative path.
    pub fn resolve(&self, username: &str, rel: &str) -> PathBuf {
        let mut path = self.user_root(username);
        for component in rel.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    /// Check whether anything exists at the path.
    pub async fn exists(&self, username: &str, rel: &str) -> Result<bool> {
        Ok(fs::try_exists(self.resolve(username, rel)).await?)
    }

    /// Write a new file.
    ///
    /// Content goes to a temporary sibling first and is renamed into place,
    /// so a failed write never leaves a truncated file at `rel`.
    pub async fn save(&self, username: &str, rel: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(username, rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = target.with_file_name(format!(
            "{PARTIAL_UPLOAD_PREFIX}{}{PARTIAL_UPLOAD_SUFFIX}",
            Uuid::new_v4()
        ));
        if let Err(e) = fs::write(&temp, content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Read a file's content.
    pub async fn load(&self, username: &str, rel: &str) -> Result<Vec<u8>> {
        match fs::read(self.resolve(username, rel)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StowageError::NotFound(format!("file {rel}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a folder (and any missing parents).
    pub async fn create_dir(&self, username: &str, rel: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(username, rel)).await?;
        Ok(())
    }

    /// Remove a file or a folder with its contents.
    ///
    /// Returns `false` if nothing existed at the path.
    pub async fn remove(&self, username: &str, rel: &str) -> Result<bool> {
        let path = self.resolve(username, rel);

        let metadata = match fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(true)
    }

    /// Rename `from` to `to` within a user's tree.
    pub async fn rename(&self, username: &str, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(username, from);
        let target = self.resolve(username, to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StowageError::NotFound(format!("file {from}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
