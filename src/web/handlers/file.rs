//! File handlers for Web API.

use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use std::sync::Arc;

use crate::file::path::normalize_folder;
use crate::file::{Download, FileEntry, StorageStats};
use crate::format::format_size_i64;
use crate::web::dto::{
    ApiResponse, CreateFolderRequest, FolderQuery, ListingResponse, MoveRequest, PathQuery,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::RemoteUser;

/// Generate a safe Content-Disposition header value.
///
/// `disposition` is `attachment` or `inline`. Control characters are
/// removed and quotes/backslashes replaced in the plain `filename`
/// parameter; non-ASCII names additionally get an RFC 5987 `filename*`.
fn content_disposition_header(disposition: &str, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();

    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("{disposition}; filename=\"{filename}\"");
    }

    let encoded = urlencoding::encode(filename);
    format!("{disposition}; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

fn file_response(download: Download, disposition: &str) -> Result<Response<Body>, ApiError> {
    let Download { record, content } = download;

    let content_type = record
        .mime_type
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&record.name)
                .first_or_octet_stream()
                .to_string()
        });

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(disposition, &record.name),
        )
        .header(header::CONTENT_LENGTH, content.len())
        .body(Body::from(content))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

/// GET /api/files?folder= - List a folder.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Query(query): Query<FolderQuery>,
) -> Result<Json<ApiResponse<ListingResponse>>, ApiError> {
    let folder = normalize_folder(&query.folder)?;
    let listing = state.files.list(&username, &folder).await?;
    let size = state.files.folder_size(&username, &folder).await?;

    Ok(Json(ApiResponse::new(ListingResponse {
        folder,
        size,
        size_display: format_size_i64(size),
        entries: listing.to_vec(),
    })))
}

/// POST /api/files/upload?folder= - Upload a file.
///
/// Request body: multipart/form-data with a "file" field.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Query(query): Query<FolderQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<FileEntry>>), ApiError> {
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::debug!("Failed to read multipart field: {}", e);
        ApiError::bad_request("Invalid multipart data")
    })? {
        if field.name() != Some("file") {
            continue;
        }

        filename = field.file_name().map(|s| s.to_string());
        content_type = field.content_type().map(|s| s.to_string());
        content = Some(
            field
                .bytes()
                .await
                .map_err(|e| {
                    tracing::debug!("Failed to read file content: {}", e);
                    ApiError::bad_request("Failed to read file")
                })?
                .to_vec(),
        );
    }

    let filename = filename.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    let content = content.ok_or_else(|| ApiError::bad_request("No file content"))?;

    let record = state
        .files
        .upload(
            &username,
            &query.folder,
            &filename,
            &content,
            content_type.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(FileEntry::from(&record))),
    ))
}

/// GET /api/files/download?path= - Download a file.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Query(query): Query<PathQuery>,
) -> Result<Response<Body>, ApiError> {
    let download = state.files.download(&username, &query.path).await?;
    file_response(download, "attachment")
}

/// GET /api/files/thumbnail?path= - Serve an image inline.
pub async fn thumbnail(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Query(query): Query<PathQuery>,
) -> Result<Response<Body>, ApiError> {
    let download = state.files.thumbnail(&username, &query.path).await?;
    let mut response = file_response(download, "inline")?;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("private, max-age=3600"),
    );
    Ok(response)
}

/// DELETE /api/files?path= - Delete a file or folder.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Query(query): Query<PathQuery>,
) -> Result<Json<ApiResponse<FileEntry>>, ApiError> {
    let record = state.files.delete(&username, &query.path).await?;
    Ok(Json(ApiResponse::new(FileEntry::from(&record))))
}

/// POST /api/folders - Create a folder.
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Json(req): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FileEntry>>), ApiError> {
    let record = state
        .files
        .create_folder(&username, &req.parent, &req.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(FileEntry::from(&record))),
    ))
}

/// GET /api/folders - Every folder of the user, for choosing a move target.
pub async fn list_folders(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    let folders = state.files.list_folders(&username).await?;
    Ok(Json(ApiResponse::new(folders)))
}

/// POST /api/files/move - Move an entry into another folder.
pub async fn move_file(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
    Json(req): Json<MoveRequest>,
) -> Result<Json<ApiResponse<FileEntry>>, ApiError> {
    let record = state
        .files
        .move_entry(&username, &req.path, &req.target_folder)
        .await?;

    Ok(Json(ApiResponse::new(FileEntry::from(&record))))
}

/// GET /api/stats - Storage usage summary.
pub async fn storage_stats(
    State(state): State<Arc<AppState>>,
    RemoteUser(username): RemoteUser,
) -> Result<Json<ApiResponse<StorageStats>>, ApiError> {
    let stats = state.files.storage_stats(&username).await?;
    Ok(Json(ApiResponse::new(stats)))
}
