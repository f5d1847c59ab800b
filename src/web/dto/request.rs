//! Request DTOs for Web API.

use serde::Deserialize;

/// `?folder=` query; absent means the user's root.
#[derive(Debug, Default, Deserialize)]
pub struct FolderQuery {
    #[serde(default)]
    pub folder: String,
}

/// `?path=` query naming one entry.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// Folder creation request.
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    /// Containing folder, root if omitted.
    #[serde(default)]
    pub parent: String,
    /// Name of the new folder.
    pub name: String,
}

/// Move request.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// Entry to move.
    pub path: String,
    /// Destination folder; the entry keeps its name.
    #[serde(default)]
    pub target_folder: String,
}
