//! Transfer orchestrator
//!
//! Drives one candidate through the peer backend's download lifecycle:
//! enqueue, poll until a terminal state, then move the finished file into
//! the job's output directory under a clean `Artist - Title.ext` name.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::slskd_client::PeerBackend;
use crate::models::{Candidate, TransferAttempt, TransferState};
use crate::utils::{basename_any, parent_dir_any, safe_filename};

/// Transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer failed: {0}")]
    Failed(String),

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transfer cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Directory the peer backend writes completed downloads into
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
    pub enqueue_attempts: u32,
    pub enqueue_retry_delay: Duration,
}

impl TransferSettings {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            poll_interval: Duration::from_millis(2000),
            enqueue_attempts: 3,
            enqueue_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Map a slskd transfer state string onto the attempt state machine.
///
/// `None` for strings that carry no lifecycle information.
pub fn map_backend_state(raw: &str) -> Option<TransferState> {
    let lower = raw.trim().to_ascii_lowercase();
    if lower == "requested" || lower.starts_with("queued") {
        return Some(TransferState::Queued);
    }
    if lower == "initializing" || lower == "inprogress" {
        return Some(TransferState::InProgress);
    }
    if let Some(outcome) = lower.strip_prefix("completed") {
        let outcome = outcome.trim_start_matches(',').trim();
        return Some(if outcome == "succeeded" {
            TransferState::Completed
        } else {
            TransferState::Failed
        });
    }
    None
}

pub struct TransferOrchestrator {
    backend: Arc<dyn PeerBackend>,
    settings: TransferSettings,
    /// Serializes collision checks and moves into output directories
    place_lock: Mutex<()>,
}

impl TransferOrchestrator {
    pub fn new(backend: Arc<dyn PeerBackend>, settings: TransferSettings) -> Self {
        Self {
            backend,
            settings,
            place_lock: Mutex::new(()),
        }
    }

    /// Download `candidate` into `dest_dir` as `<target_name>.<ext>`.
    ///
    /// `on_progress` receives the backend state string and percent whenever
    /// either changes. On timeout or cancellation the backend transfer is
    /// cancelled before the error is returned.
    pub async fn download<F>(
        &self,
        candidate: &Candidate,
        dest_dir: &Path,
        target_name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PathBuf, TransferError>
    where
        F: FnMut(&str, f64) + Send,
    {
        let mut attempt = TransferAttempt::new(candidate.clone());

        if let Err(e) = self.enqueue(candidate, cancel).await {
            attempt.transition_to(TransferState::Failed);
            return Err(e);
        }
        attempt.transition_to(TransferState::InProgress);
        tracing::debug!(user = %candidate.username, file = %candidate.filename, "Transfer enqueued");

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                self.abort(candidate).await;
                return Err(TransferError::Cancelled);
            }

            match self
                .backend
                .download_status(&candidate.username, &candidate.filename)
                .await
            {
                Ok(Some(status)) => {
                    if status.state != attempt.backend_state || status.percent != attempt.percent {
                        attempt.backend_state = status.state.clone();
                        attempt.percent = status.percent;
                        on_progress(&status.state, status.percent);
                    }
                    match map_backend_state(&status.state) {
                        Some(TransferState::Completed) => {
                            attempt.transition_to(TransferState::Completed);
                            break;
                        }
                        Some(TransferState::Failed) => {
                            attempt.transition_to(TransferState::Failed);
                            return Err(TransferError::Failed(format!(
                                "backend reported {}",
                                status.state
                            )));
                        }
                        _ => {}
                    }
                }
                // Not visible yet
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user = %candidate.username, error = %e, "Transfer status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                attempt.transition_to(TransferState::TimedOut);
                self.abort(candidate).await;
                return Err(TransferError::Timeout(timeout));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.abort(candidate).await;
                    return Err(TransferError::Cancelled);
                }
                _ = tokio::time::sleep(self.settings.poll_interval.min(deadline - now)) => {}
            }
        }

        tracing::debug!(
            user = %candidate.username,
            file = %candidate.filename,
            elapsed_ms = (chrono::Utc::now() - attempt.started_at).num_milliseconds(),
            "Transfer completed"
        );
        self.finalize(candidate, dest_dir, target_name).await
    }

    async fn enqueue(&self, candidate: &Candidate, cancel: &CancellationToken) -> Result<(), TransferError> {
        let attempts = self.settings.enqueue_attempts.max(1);
        let mut last_error = String::new();
        for n in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            match self
                .backend
                .enqueue_download(&candidate.username, &candidate.filename, candidate.size)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(user = %candidate.username, attempt = n, error = %e, "Enqueue failed");
                    last_error = e.to_string();
                }
            }
            if n < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(self.settings.enqueue_retry_delay) => {}
                }
            }
        }
        Err(TransferError::Failed(format!("enqueue rejected: {}", last_error)))
    }

    async fn abort(&self, candidate: &Candidate) {
        if let Err(e) = self
            .backend
            .cancel_download(&candidate.username, &candidate.filename)
            .await
        {
            tracing::warn!(user = %candidate.username, file = %candidate.filename, error = %e, "Failed to cancel backend transfer");
        }
    }

    /// Locate the finished file, check it, and move it into place
    async fn finalize(
        &self,
        candidate: &Candidate,
        dest_dir: &Path,
        target_name: &str,
    ) -> Result<PathBuf, TransferError> {
        let download_dir = self.settings.download_dir.clone();
        let remote = candidate.filename.clone();
        let source = tokio::task::spawn_blocking(move || locate_download(&download_dir, &remote))
            .await
            .map_err(|e| TransferError::Failed(format!("file search task failed: {}", e)))?
            .ok_or_else(|| {
                TransferError::Failed(format!(
                    "completed file {} not found in {}",
                    candidate.basename(),
                    self.settings.download_dir.display()
                ))
            })?;

        let size = tokio::fs::metadata(&source)
            .await
            .map_err(|e| TransferError::Failed(format!("cannot stat {}: {}", source.display(), e)))?
            .len();
        if size == 0 {
            return Err(TransferError::Failed(format!("downloaded file {} is empty", source.display())));
        }

        let _guard = self.place_lock.lock().await;
        place_file(&source, dest_dir, target_name, &candidate.extension)
            .await
            .map_err(|e| TransferError::Failed(format!("cannot move {} into place: {}", source.display(), e)))
    }
}

/// Where the finished copy of remote file `remote` ended up under `root`.
///
/// slskd writes into `<root>/<innermost remote dir>/<basename>`; when that is
/// missing the newest file with the same name anywhere under `root` is used.
pub fn locate_download(root: &Path, remote: &str) -> Option<PathBuf> {
    let basename = basename_any(remote);
    if let Some(dir) = parent_dir_any(remote).filter(|d| *d != "." && *d != "..") {
        let expected = root.join(dir).join(basename);
        if expected.is_file() {
            return Some(expected);
        }
    }

    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == basename)
        .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .map(|e| e.into_path())
}

/// First free path of `stem.ext`, `stem (1).ext`, `stem (2).ext`, ...
pub async fn unique_destination(dest_dir: &Path, stem: &str, extension: &str) -> std::io::Result<PathBuf> {
    let file_name = |n: usize| {
        let name = if n == 0 {
            stem.to_string()
        } else {
            format!("{} ({})", stem, n)
        };
        if extension.is_empty() {
            name
        } else {
            format!("{}.{}", name, extension)
        }
    };

    let mut n = 0;
    loop {
        let candidate = dest_dir.join(file_name(n));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Move `source` into `dest_dir` under a sanitized, collision-free name
pub async fn place_file(
    source: &Path,
    dest_dir: &Path,
    target_name: &str,
    extension: &str,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dest_dir).await?;
    let destination = unique_destination(dest_dir, &safe_filename(target_name), extension).await?;

    if tokio::fs::rename(source, &destination).await.is_err() {
        // Cross-device: copy then remove
        tokio::fs::copy(source, &destination).await?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(destination)
}
