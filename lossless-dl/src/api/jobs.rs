//! Job lifecycle handlers
//!
//! POST /jobs, GET /jobs, GET /jobs/:id, POST /jobs/:id/{pause,resume,cancel}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{DownloadPreferences, FormatPreferenceInput, JobSnapshot, JobStatus, Track};
use crate::AppState;

fn default_playlist_name() -> String {
    "Playlist".to_string()
}

fn default_true() -> bool {
    true
}

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    #[serde(default = "default_playlist_name")]
    pub playlist_name: String,
    /// Fetched from the metadata service when `tracks` is empty
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub format_preferences: Option<FormatPreferenceInput>,
    #[serde(default = "default_true")]
    pub allow_lossy_fallback: bool,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub track_limit: Option<i64>,
}

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_tracks: usize,
}

/// POST /jobs
///
/// Accepts the job and returns 202 with its id; workers run in the background.
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let tracks = if !request.tracks.is_empty() {
        request.tracks
    } else if let Some(playlist_id) = request.playlist_id.as_deref() {
        let source = state.playlist_source.as_ref().ok_or_else(|| {
            ApiError::BadRequest("No playlist source configured; send tracks directly".to_string())
        })?;
        match source.playlist_tracks(playlist_id).await {
            Ok(tracks) => tracks,
            Err(e) => {
                state.record_error(format!("playlist fetch failed: {}", e)).await;
                return Err(ApiError::Upstream(format!("Playlist fetch failed: {}", e)));
            }
        }
    } else {
        Vec::new()
    };

    if tracks.iter().any(|t| t.title.trim().is_empty()) {
        return Err(ApiError::BadRequest("Every track needs a title".to_string()));
    }

    let preferences = DownloadPreferences::from_input(
        request.format_preferences.as_ref(),
        request.allow_lossy_fallback,
        request.max_retries.unwrap_or(state.options.max_retries),
    );

    let job_id = state
        .jobs
        .create(request.playlist_name, tracks, preferences, request.track_limit)
        .await?;
    let snapshot = state.jobs.get_snapshot(job_id)?;

    tracing::info!(job_id = %job_id, tracks = snapshot.total_tracks, "Download job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id,
            status: snapshot.status,
            total_tracks: snapshot.total_tracks,
        }),
    ))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.list_jobs())
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.jobs.get_snapshot(job_id)?))
}

/// POST /jobs/:id/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.jobs.pause(job_id)?))
}

/// POST /jobs/:id/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.jobs.resume(job_id)?))
}

/// POST /jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.jobs.cancel(job_id).await?))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/pause", post(pause_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/jobs/:id/cancel", post(cancel_job))
}
