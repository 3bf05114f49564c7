//! Job file handlers
//!
//! Files are addressed by their index in the job's file list, which never
//! changes once assigned.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::JobFile;
use crate::utils::formatting::format_bytes;
use crate::AppState;

/// GET /jobs/:id/files
pub async fn list_files(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobFile>>> {
    Ok(Json(state.jobs.list_files(job_id).await?))
}

/// GET /jobs/:id/files/:index
///
/// Streams the file as an attachment and marks it served.
pub async fn get_file(
    State(state): State<AppState>,
    Path((job_id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Response> {
    let resolved = state.jobs.get_file(job_id, index).await?;
    let file = tokio::fs::File::open(&resolved.absolute_path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ApiError::NotFound(format!("File {} is no longer on disk", resolved.file.name))
            }
            _ => ApiError::Io(e),
        })?;

    state.jobs.mark_served(job_id, &[index])?;
    tracing::debug!(job_id = %job_id, index, name = %resolved.file.name, "Serving file");

    let disposition = format!(
        "attachment; filename=\"{}\"",
        resolved.file.name.replace('"', "'")
    );
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, resolved.file.size_bytes.to_string()),
        ],
        body,
    )
        .into_response())
}

/// POST /jobs/:id/files/select request
#[derive(Debug, Default, Deserialize)]
pub struct SelectFilesRequest {
    /// Empty selects every file not yet served
    #[serde(default)]
    pub indices: Vec<usize>,
}

/// One entry of the manifest handed to an external archiver
#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub name: String,
    pub path: String,
    pub absolute_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct SelectFilesResponse {
    pub job_id: Uuid,
    pub total_bytes: u64,
    pub files: Vec<ManifestEntry>,
}

/// POST /jobs/:id/files/select
///
/// Resolves a selection to a manifest and marks the files served.
pub async fn select_files(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<SelectFilesRequest>,
) -> ApiResult<Json<SelectFilesResponse>> {
    let resolved = state.jobs.select_files(job_id, &request.indices).await?;

    let indices: Vec<usize> = resolved.iter().map(|r| r.file.index).collect();
    state.jobs.mark_served(job_id, &indices)?;

    let files: Vec<ManifestEntry> = resolved
        .into_iter()
        .map(|r| ManifestEntry {
            index: r.file.index,
            name: r.file.name,
            path: r.file.path,
            absolute_path: r.absolute_path.to_string_lossy().into_owned(),
            size_bytes: r.file.size_bytes,
        })
        .collect();
    let total_bytes = files.iter().map(|f| f.size_bytes).sum();
    tracing::info!(
        job_id = %job_id,
        files = files.len(),
        size = %format_bytes(total_bytes),
        "File selection resolved"
    );

    Ok(Json(SelectFilesResponse {
        job_id,
        total_bytes,
        files,
    }))
}

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/:id/files", get(list_files))
        .route("/jobs/:id/files/select", post(select_files))
        .route("/jobs/:id/files/:index", get(get_file))
}
