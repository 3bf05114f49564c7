//! Track resolution pipeline
//!
//! search (variants, strict to loose) → rank → transfer attempts under a
//! per-track retry budget. Everything that goes wrong below this layer is
//! folded into a single [`TrackUnresolved`] for the job to record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::ranking::rank;
use super::search_client::{SearchClient, SearchError};
use super::transfer::{TransferError, TransferOrchestrator};
use crate::models::{Candidate, DownloadPreferences, FailedTrack, Track, TriedCandidate};

/// Candidates shown per query in the job log
const LOG_PREVIEW_COUNT: usize = 5;

/// A track no candidate could satisfy
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TrackUnresolved {
    pub queries: Vec<String>,
    pub candidates: Vec<TriedCandidate>,
    pub message: String,
}

impl TrackUnresolved {
    pub fn into_failed_track(self, track: &Track) -> FailedTrack {
        FailedTrack::new(track, self.message, self.queries, self.candidates)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Unresolved(#[from] TrackUnresolved),

    #[error("Track resolution cancelled")]
    Cancelled,
}

/// Receives human-readable log lines and transfer progress for one track
pub trait ResolveSink: Send + Sync {
    fn log(&self, line: &str);
    fn progress(&self, state: &str, percent: f64);
}

/// Sink that drops everything
pub struct NullSink;

impl ResolveSink for NullSink {
    fn log(&self, _line: &str) {}
    fn progress(&self, _state: &str, _percent: f64) {}
}

/// What the query variants turned up
struct Gathered {
    queries: Vec<String>,
    /// Deduplicated across every variant tried
    pool: Vec<Candidate>,
    search_errors: Vec<SearchError>,
}

pub struct TrackResolver {
    search: Arc<SearchClient>,
    transfers: Arc<TransferOrchestrator>,
    transfer_timeout: Duration,
}

impl TrackResolver {
    pub fn new(
        search: Arc<SearchClient>,
        transfers: Arc<TransferOrchestrator>,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            search,
            transfers,
            transfer_timeout,
        }
    }

    pub fn search(&self) -> &Arc<SearchClient> {
        &self.search
    }

    /// Resolve `track` into a file under `dest_dir`
    pub async fn resolve(
        &self,
        track: &Track,
        preferences: &DownloadPreferences,
        dest_dir: &Path,
        cancel: &CancellationToken,
        sink: &dyn ResolveSink,
    ) -> Result<PathBuf, ResolveError> {
        sink.log(&format!("Searching: {}", track.display_name()));

        let Gathered { queries, pool, .. } = self
            .gather(track, preferences.allow_lossy_fallback, cancel, sink)
            .await?;

        let ranked = rank(&pool, &preferences.format_order, preferences.allow_lossy_fallback);
        if ranked.is_empty() {
            let message = if pool.is_empty() {
                "No sources found"
            } else {
                "No lossless sources found"
            };
            sink.log(&format!(" ! {}", message));
            return Err(TrackUnresolved {
                queries,
                candidates: Vec::new(),
                message: message.to_string(),
            }
            .into());
        }

        let mut tried = Vec::new();
        let budget = preferences.max_retries.max(1);
        for candidate in ranked.iter().take(budget) {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            sink.log(&format!(" > candidate: {}", candidate.label()));

            let result = self
                .transfers
                .download(
                    candidate,
                    dest_dir,
                    &track.display_name(),
                    self.transfer_timeout,
                    cancel,
                    |state, percent| sink.progress(state, percent),
                )
                .await;

            match result {
                Ok(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    sink.log(&format!(" + saved {}", name));
                    return Ok(path);
                }
                Err(TransferError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) => {
                    tracing::debug!(track = %track, user = %candidate.username, error = %e, "Candidate failed");
                    sink.log(&format!(" ! {}", e));
                    tried.push(TriedCandidate {
                        username: candidate.username.clone(),
                        filename: candidate.filename.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let message = if tried.len() < ranked.len() {
            format!("Retry budget of {} attempts exhausted", budget)
        } else {
            "All candidates failed".to_string()
        };
        sink.log(&format!(" ! {}", message));
        Err(TrackUnresolved {
            queries,
            candidates: tried,
            message,
        }
        .into())
    }

    /// Ranked candidates for `track` without starting any transfer.
    ///
    /// Errors only when every query variant failed at the search backend,
    /// so "backend down" stays distinct from "no hits".
    pub async fn preview(
        &self,
        track: &Track,
        preferences: &DownloadPreferences,
        limit: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        let cancel = CancellationToken::new();
        let mut gathered = match self
            .gather(track, preferences.allow_lossy_fallback, &cancel, &NullSink)
            .await
        {
            Ok(gathered) => gathered,
            Err(_) => return Ok(Vec::new()),
        };

        if gathered.pool.is_empty() && gathered.search_errors.len() == gathered.queries.len() {
            if let Some(e) = gathered.search_errors.pop() {
                return Err(e);
            }
        }

        let mut ranked = rank(&gathered.pool, &preferences.format_order, preferences.allow_lossy_fallback);
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Run query variants until the pool holds a usable candidate, one that
    /// survives the lossy filter
    async fn gather(
        &self,
        track: &Track,
        allow_lossy_fallback: bool,
        cancel: &CancellationToken,
        sink: &dyn ResolveSink,
    ) -> Result<Gathered, ResolveError> {
        let mut gathered = Gathered {
            queries: Vec::new(),
            pool: Vec::new(),
            search_errors: Vec::new(),
        };
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for query in track.query_variants() {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            sink.log(&format!(" - query: {}", query));
            gathered.queries.push(query.clone());

            let found = tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                r = self.search.search(&query, self.search.default_timeout()) => r,
            };

            match found {
                Ok(found) => {
                    sink.log(&format!("   {} hits", found.len()));
                    for preview in found.iter().take(LOG_PREVIEW_COUNT) {
                        sink.log(&format!("     {}", preview.label()));
                    }
                    for candidate in found {
                        let (username, filename) = candidate.key();
                        if seen.insert((username.to_owned(), filename.to_owned())) {
                            gathered.pool.push(candidate);
                        }
                    }
                    if gathered
                        .pool
                        .iter()
                        .any(|c| allow_lossy_fallback || c.is_lossless)
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(track = %track, query = %query, error = %e, "Search failed");
                    sink.log(&format!(" ! search failed: {}", e));
                    gathered.search_errors.push(e);
                }
            }
        }

        Ok(gathered)
    }
}
