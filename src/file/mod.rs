//! File management module for Stowage.
//!
//! This module provides per-user file storage:
//! - Folder and file metadata in the database
//! - Physical files under one directory per user
//! - The [`FileService`] that ties both to the lock registry and cache

mod metadata;
pub mod path;
mod service;
mod storage;

use serde::Serialize;

pub use metadata::{FileRecord, FileRepository, NewFileRecord};
pub use service::{CategoryStats, Download, FileEntry, FileService, Listing, StorageStats};
pub use storage::FileStorage;

/// Maximum length for a file or folder name (in characters).
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Default maximum file size (100MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Number of entries in the "recent files" part of the storage stats.
pub const RECENT_FILES_LIMIT: i64 = 5;

/// In-flight uploads are staged next to their target as
/// `.upload-<uuid>.part`. Such names are reserved for staging and never
/// accepted as user file names.
pub const PARTIAL_UPLOAD_PREFIX: &str = ".upload-";
pub const PARTIAL_UPLOAD_SUFFIX: &str = ".part";

/// Whether `name` is a staging name for an in-flight upload.
pub fn is_partial_upload(name: &str) -> bool {
    name.starts_with(PARTIAL_UPLOAD_PREFIX) && name.ends_with(PARTIAL_UPLOAD_SUFFIX)
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

fn extension(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a file name has an image extension that can be shown inline.
pub fn is_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Coarse file type used in the storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileCategory {
    Images,
    Videos,
    Audio,
    Documents,
    Archives,
    Code,
    Others,
}

impl FileCategory {
    /// All categories in display order.
    pub const ALL: [FileCategory; 7] = [
        FileCategory::Images,
        FileCategory::Videos,
        FileCategory::Audio,
        FileCategory::Documents,
        FileCategory::Archives,
        FileCategory::Code,
        FileCategory::Others,
    ];

    /// Categorize a file by its extension.
    pub fn from_name(name: &str) -> Self {
        let Some(ext) = extension(name) else {
            return FileCategory::Others;
        };

        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg" | "heic" => {
                FileCategory::Images
            }
            "mp4" | "avi" | "mkv" | "mov" | "webm" | "wmv" => FileCategory::Videos,
            "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => FileCategory::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" | "odt"
            | "csv" | "rtf" => FileCategory::Documents,
            "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => FileCategory::Archives,
            "rs" | "go" | "py" | "js" | "ts" | "html" | "css" | "json" | "toml" | "yaml"
            | "yml" | "c" | "cpp" | "h" | "java" | "sh" => FileCategory::Code,
            _ => FileCategory::Others,
        }
    }
}
