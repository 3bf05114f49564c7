//! Background eviction of finished jobs and stale manual downloads

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::JobManager;

/// Sweep expired jobs every `interval` until `shutdown` fires
pub fn spawn_sweeper(
    manager: Arc<JobManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Retention sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = manager.sweep_expired().await;
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "Retention sweep evicted jobs");
                    }
                    let removed = manager.sweep_manual_downloads().await;
                    if removed > 0 {
                        tracing::info!(count = removed, "Retention sweep removed manual downloads");
                    }
                }
            }
        }
    })
}

/// Delete files under `dir` last modified at least `retention` ago, then any
/// directories left empty. Returns the number of files removed.
pub(crate) fn sweep_stale_files(dir: &Path, retention: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= retention);
        if !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(file = %entry.path().display(), error = %e, "Failed to remove stale file"),
        }
    }

    // Deepest first; remove_dir fails harmlessly on non-empty directories
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            let _ = std::fs::remove_dir(entry.path());
        }
    }
    removed
}
