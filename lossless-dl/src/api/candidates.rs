//! Candidate preview and manual download
//!
//! POST /candidates returns ranked candidates per track without starting a
//! transfer; POST /candidates/download fetches one chosen candidate.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::models::{Candidate, DownloadPreferences, FormatPreferenceInput, Track};
use crate::services::TransferError;
use crate::utils::{basename_any, safe_filename};
use crate::AppState;

fn default_true() -> bool {
    true
}

/// POST /candidates request
#[derive(Debug, Deserialize)]
pub struct CandidatesRequest {
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub format_preferences: Option<FormatPreferenceInput>,
    #[serde(default = "default_true")]
    pub allow_lossy_fallback: bool,
    /// Candidates per track
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TrackCandidates {
    pub track: Track,
    pub candidates: Vec<Candidate>,
    /// Set when the search backend failed for every query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
    pub results: Vec<TrackCandidates>,
}

/// POST /candidates
pub async fn preview_candidates(
    State(state): State<AppState>,
    Json(request): Json<CandidatesRequest>,
) -> ApiResult<Json<CandidatesResponse>> {
    let max_tracks = state.jobs.settings().max_tracks_per_job;
    if request.tracks.len() > max_tracks {
        return Err(ApiError::BadRequest(format!(
            "At most {} tracks per preview request",
            max_tracks
        )));
    }

    let preferences = DownloadPreferences::from_input(
        request.format_preferences.as_ref(),
        request.allow_lossy_fallback,
        state.options.max_retries,
    );
    let limit = request
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(state.options.candidate_limit);

    let resolver = state.jobs.resolver();
    let mut results = Vec::with_capacity(request.tracks.len());
    for track in request.tracks {
        let (candidates, error) = match resolver.preview(&track, &preferences, limit).await {
            Ok(candidates) => (candidates, None),
            Err(e) => {
                tracing::warn!(track = %track, error = %e, "Candidate preview search failed");
                (Vec::new(), Some(e.to_string()))
            }
        };
        results.push(TrackCandidates {
            track,
            candidates,
            error,
        });
    }

    Ok(Json(CandidatesResponse { results }))
}

/// The chosen candidate, as returned by the preview endpoint
#[derive(Debug, Deserialize)]
pub struct ChosenCandidate {
    pub username: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
}

/// POST /candidates/download request
#[derive(Debug, Deserialize)]
pub struct ManualDownloadRequest {
    pub candidate: ChosenCandidate,
    /// Names the output file; the remote file name is kept without it
    #[serde(default)]
    pub track: Option<Track>,
    #[serde(default)]
    pub playlist_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ManualDownloadResponse {
    pub name: String,
    /// Relative to the output root
    pub path: String,
    pub size_bytes: u64,
}

/// POST /candidates/download
///
/// Runs the transfer inline into `<output_root>/manual/<playlist>/`; the
/// retention sweeper deletes these files like finished job output.
pub async fn download_candidate(
    State(state): State<AppState>,
    Json(request): Json<ManualDownloadRequest>,
) -> ApiResult<Json<ManualDownloadResponse>> {
    let chosen = request.candidate;
    if chosen.username.trim().is_empty() || chosen.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("candidate needs username and filename".to_string()));
    }

    let lossless = &state.jobs.resolver().search().settings().lossless;
    let candidate = Candidate::new(chosen.username, chosen.filename, chosen.size, None, None, None, lossless);

    let target_name = match &request.track {
        Some(track) => track.display_name(),
        None => {
            let base = basename_any(&candidate.filename);
            base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base).to_string()
        }
    };

    let output_root = state.jobs.settings().output_root.clone();
    let playlist = safe_filename(request.playlist_name.as_deref().unwrap_or("Manual"));
    let dest_dir = state.jobs.manual_dir().join(playlist);

    tracing::info!(user = %candidate.username, file = %candidate.filename, "Manual download requested");

    let path = state
        .transfers
        .download(
            &candidate,
            &dest_dir,
            &target_name,
            state.options.manual_transfer_timeout,
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .map_err(|e: TransferError| ApiError::Upstream(e.to_string()))?;

    let size_bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative = path
        .strip_prefix(&output_root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| name.clone());

    Ok(Json(ManualDownloadResponse {
        name,
        path: relative,
        size_bytes,
    }))
}

pub fn candidate_routes() -> Router<AppState> {
    Router::new()
        .route("/candidates", post(preview_candidates))
        .route("/candidates/download", post(download_candidate))
}
