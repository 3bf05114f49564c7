//! Job snapshot types returned to callers
//!
//! The mutable job state lives inside the job manager; these are the
//! read-only copies handed out to pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use lossless_common::events::JobStatus;

use super::preferences::DownloadPreferences;
use super::track::Track;

/// One candidate that was tried for a failed track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriedCandidate {
    pub username: String,
    pub filename: String,
    pub reason: String,
}

/// Structured reason a track could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTrack {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub message: String,
    /// Query variants issued, in order
    pub queries: Vec<String>,
    pub candidates: Vec<TriedCandidate>,
}

impl FailedTrack {
    pub fn new(
        track: &Track,
        message: impl Into<String>,
        queries: Vec<String>,
        candidates: Vec<TriedCandidate>,
    ) -> Self {
        Self {
            artist: track.artist.clone(),
            title: track.title.clone(),
            album: track.album.clone(),
            message: message.into(),
            queries,
            candidates,
        }
    }
}

/// Point-in-time copy of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub playlist_name: String,
    pub preferences: DownloadPreferences,
    pub total_tracks: usize,
    pub processed_tracks: usize,
    pub ok_count: usize,
    pub fail_count: usize,
    pub current_track_name: String,
    pub current_download_state: String,
    pub current_download_percent: f64,
    pub logs: Vec<String>,
    pub failed_tracks: Vec<FailedTrack>,
    /// Output files relative to the output root; index is the fetch address
    pub files: Vec<String>,
    /// Indices of files the caller has not fetched yet
    pub pending_files: Vec<usize>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
}

/// Entry in a job's file listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub index: usize,
    /// File name without directories
    pub name: String,
    /// Path relative to the output root
    pub path: String,
    pub size_bytes: u64,
    pub served: bool,
}
