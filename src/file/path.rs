//! Path helpers for user storage trees.
//!
//! Paths handed to the file service are relative to the user's root and use
//! `/` as separator. The root folder is the empty string.

use crate::{Result, StowageError};

use super::{is_partial_upload, MAX_FILENAME_LENGTH};

/// Normalize a user-relative folder path.
///
/// Leading, trailing and repeated separators and `.` components are dropped;
/// `""` and `"/"` both mean the root. `..` is rejected.
pub fn normalize_folder(folder: &str) -> Result<String> {
    let mut components = Vec::new();

    for component in folder.trim().split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(StowageError::Validation(format!(
                    "path must not contain '..': {folder}"
                )))
            }
            c if c.contains('\\') || c.contains('\0') => {
                return Err(StowageError::Validation(format!("invalid path: {folder}")))
            }
            c => components.push(c),
        }
    }

    Ok(components.join("/"))
}

/// Normalize a path that must name an entry (not the root).
pub fn normalize_path(path: &str) -> Result<String> {
    let normalized = normalize_folder(path)?;
    if normalized.is_empty() {
        return Err(StowageError::Validation("path is required".to_string()));
    }
    Ok(normalized)
}

/// Validate a single file or folder name and return it trimmed.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(StowageError::Validation("name is required".to_string()));
    }
    if name == "." || name == ".." {
        return Err(StowageError::Validation(format!("invalid name: {name}")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(StowageError::Validation(format!(
            "name must not contain path separators: {name}"
        )));
    }
    if is_partial_upload(name) {
        return Err(StowageError::Validation(format!("reserved name: {name}")));
    }
    if name.chars().count() > MAX_FILENAME_LENGTH {
        return Err(StowageError::Validation(format!(
            "name must be at most {MAX_FILENAME_LENGTH} characters"
        )));
    }

    Ok(name.to_string())
}

/// Validate a username for use as a storage directory and cache scope.
pub fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.len() <= 64
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !username.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(StowageError::Validation(format!("invalid username: {username}")))
    }
}

/// Join a folder and a name into a user-relative path.
pub fn join(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

/// Whether `path` is `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}
