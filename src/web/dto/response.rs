//! Response DTOs for Web API.

use serde::Serialize;

use crate::file::FileEntry;

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Contents of one folder.
#[derive(Debug, Serialize)]
pub struct ListingResponse {
    /// Normalized folder path, `""` for the root.
    pub folder: String,
    /// Total size of the folder's tree in bytes.
    pub size: i64,
    pub size_display: String,
    pub entries: Vec<FileEntry>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
