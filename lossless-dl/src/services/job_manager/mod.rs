//! Job manager
//!
//! Owns every download job in the process: creates them, hands out
//! snapshots, and applies pause, resume and cancel. Each job runs on its
//! own task with a bounded set of workers; a process-wide semaphore caps
//! how many tracks are in flight across all jobs.
//!
//! Job state is in-memory only. Finished jobs are kept for the retention
//! window so callers can collect their files, then evicted by the sweeper.

mod retention;
mod state;
mod worker;

pub use retention::spawn_sweeper;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lossless_common::events::{DlEvent, EventBus};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use self::state::JobHandle;

/// Output subdirectory for manual downloads; shares the job retention window
const MANUAL_DIR: &str = "manual";
use self::worker::JobContext;
use super::track_resolver::TrackResolver;
use crate::models::{DownloadPreferences, JobFile, JobSnapshot, JobStatus, Track};

/// Job manager errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("File index {index} out of range for job {job_id}")]
    FileIndex { job_id: Uuid, index: usize },

    #[error("Job {0} is already {1}")]
    Finished(Uuid, JobStatus),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Jobs write into `<output_root>/<job_id>/`
    pub output_root: PathBuf,
    pub workers_per_job: usize,
    pub max_concurrent_tracks: usize,
    pub max_tracks_per_job: usize,
    /// How long finished jobs stay queryable
    pub retention: Duration,
    pub log_capacity: usize,
}

impl JobSettings {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            workers_per_job: 4,
            max_concurrent_tracks: 8,
            max_tracks_per_job: 50,
            retention: Duration::from_secs(5 * 60 * 60),
            log_capacity: 200,
        }
    }

    /// Requested cap clamped into `1..=max_tracks_per_job`; missing or
    /// non-positive requests get the maximum
    pub fn effective_track_limit(&self, requested: Option<i64>) -> usize {
        let max = self.max_tracks_per_job.max(1);
        match requested {
            Some(n) if n > 0 => (n as u64).min(max as u64) as usize,
            _ => max,
        }
    }
}

/// A file resolved for download, with its absolute location
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file: JobFile,
    pub absolute_path: PathBuf,
}

pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, Arc<JobHandle>>>,
    resolver: Arc<TrackResolver>,
    event_bus: EventBus,
    settings: JobSettings,
    track_slots: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(resolver: Arc<TrackResolver>, event_bus: EventBus, settings: JobSettings) -> Self {
        let track_slots = Arc::new(Semaphore::new(settings.max_concurrent_tracks.max(1)));
        Self {
            jobs: RwLock::new(HashMap::new()),
            resolver,
            event_bus,
            settings,
            track_slots,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<TrackResolver> {
        &self.resolver
    }

    fn handle(&self, job_id: Uuid) -> Result<Arc<JobHandle>, JobError> {
        self.jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    /// Start a job for `tracks`, truncated to the effective track limit.
    ///
    /// Workers start immediately; a job with no tracks is completed before
    /// this returns.
    pub async fn create(
        &self,
        playlist_name: impl Into<String>,
        mut tracks: Vec<Track>,
        preferences: DownloadPreferences,
        track_limit: Option<i64>,
    ) -> Result<Uuid, JobError> {
        let limit = self.settings.effective_track_limit(track_limit);
        tracks.truncate(limit);

        let job_id = Uuid::new_v4();
        let playlist_name = playlist_name.into();
        let handle = Arc::new(JobHandle::new(
            job_id,
            &self.settings.output_root,
            playlist_name.clone(),
            preferences.clone(),
            tracks.len(),
            self.settings.log_capacity,
        ));
        tokio::fs::create_dir_all(&handle.output_dir).await?;

        self.jobs.write().insert(job_id, Arc::clone(&handle));
        self.event_bus.emit_lossy(DlEvent::JobCreated {
            job_id,
            playlist_name: playlist_name.clone(),
            total_tracks: tracks.len(),
            timestamp: Utc::now(),
        });

        let ctx = JobContext {
            handle,
            resolver: Arc::clone(&self.resolver),
            event_bus: self.event_bus.clone(),
            track_slots: Arc::clone(&self.track_slots),
        };
        ctx.log(format!(
            "Job {} started: {} · {} tracks · prefer={} · lossy_ok={}",
            job_id,
            playlist_name,
            tracks.len(),
            preferences.label(),
            preferences.allow_lossy_fallback
        ));

        if tracks.is_empty() {
            let events = ctx.handle.finish();
            ctx.publish(events);
            return Ok(job_id);
        }

        let workers = self.settings.workers_per_job;
        tokio::spawn(worker::run_job(ctx, tracks, workers));
        Ok(job_id)
    }

    pub fn get_snapshot(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        Ok(self.handle(job_id)?.snapshot())
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.jobs.read().values().map(|h| h.snapshot()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn pause(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        let handle = self.handle(job_id)?;
        let events = handle
            .request_pause()
            .map_err(|status| JobError::Finished(job_id, status))?;
        self.publish(events);
        tracing::info!(job_id = %job_id, "Pause requested");
        Ok(handle.snapshot())
    }

    pub fn resume(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        let handle = self.handle(job_id)?;
        let events = handle
            .request_resume()
            .map_err(|status| JobError::Finished(job_id, status))?;
        self.publish(events);
        tracing::info!(job_id = %job_id, "Resume requested");
        Ok(handle.snapshot())
    }

    /// Cancel a job and delete its output. Idempotent; also valid on a
    /// finished job, whose files are then discarded.
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobSnapshot, JobError> {
        let handle = self.handle(job_id)?;
        let events = handle.mark_cancelled();
        self.publish(events);
        remove_output_dir(&handle.output_dir).await;
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(handle.snapshot())
    }

    /// Ordered file listing with sizes and served flags
    pub async fn list_files(&self, job_id: Uuid) -> Result<Vec<JobFile>, JobError> {
        let handle = self.handle(job_id)?;
        let mut files = Vec::new();
        for (index, (relative, served)) in handle.files_with_served().into_iter().enumerate() {
            files.push(self.describe(index, relative, served).await);
        }
        Ok(files)
    }

    /// Resolve one file index to its location on disk
    pub async fn get_file(&self, job_id: Uuid, index: usize) -> Result<ResolvedFile, JobError> {
        let handle = self.handle(job_id)?;
        let relative = handle
            .file_at(index)
            .ok_or(JobError::FileIndex { job_id, index })?;
        let served = handle.files_with_served().get(index).map(|(_, s)| *s).unwrap_or(false);
        let file = self.describe(index, relative, served).await;
        let absolute_path = self.settings.output_root.join(&file.path);
        Ok(ResolvedFile { file, absolute_path })
    }

    /// Resolve several indices at once for an external archiver.
    ///
    /// An empty selection means every file not yet served. Duplicates are
    /// collapsed and the result is in index order.
    pub async fn select_files(&self, job_id: Uuid, indices: &[usize]) -> Result<Vec<ResolvedFile>, JobError> {
        let handle = self.handle(job_id)?;
        let selection: BTreeSet<usize> = if indices.is_empty() {
            handle.snapshot().pending_files.into_iter().collect()
        } else {
            indices.iter().copied().collect()
        };

        let mut resolved = Vec::with_capacity(selection.len());
        for index in selection {
            resolved.push(self.get_file(job_id, index).await?);
        }
        Ok(resolved)
    }

    pub fn mark_served(&self, job_id: Uuid, indices: &[usize]) -> Result<(), JobError> {
        self.handle(job_id)?.mark_served(indices);
        Ok(())
    }

    /// Evict finished jobs older than the retention window and delete their
    /// output. Returns the evicted ids.
    pub async fn sweep_expired(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let retention = self.settings.retention;

        let expired: Vec<Arc<JobHandle>> = {
            let mut jobs = self.jobs.write();
            let ids: Vec<Uuid> = jobs
                .iter()
                .filter(|(_, h)| {
                    h.status().is_terminal()
                        && h.finished_at()
                            .and_then(|at| (now - at).to_std().ok())
                            .is_some_and(|age| age >= retention)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        let mut evicted = Vec::with_capacity(expired.len());
        for handle in expired {
            handle.cancel.cancel();
            remove_output_dir(&handle.output_dir).await;
            tracing::info!(job_id = %handle.id, "Evicted expired job");
            evicted.push(handle.id);
        }
        evicted
    }

    /// Delete manual downloads older than the retention window.
    /// Returns the number of files removed.
    pub async fn sweep_manual_downloads(&self) -> usize {
        let dir = self.manual_dir();
        let max_age = self.settings.retention;
        match tokio::task::spawn_blocking(move || retention::sweep_stale_files(&dir, max_age)).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Manual download sweep task failed");
                0
            }
        }
    }

    /// Where manual candidate downloads land, `<output_root>/manual/`
    pub fn manual_dir(&self) -> PathBuf {
        self.settings.output_root.join(MANUAL_DIR)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    async fn describe(&self, index: usize, relative: String, served: bool) -> JobFile {
        let absolute = self.settings.output_root.join(&relative);
        let size_bytes = tokio::fs::metadata(&absolute)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let name = Path::new(&relative)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative.clone());
        JobFile {
            index,
            name,
            path: relative,
            size_bytes,
            served,
        }
    }

    fn publish(&self, events: Vec<DlEvent>) {
        for event in events {
            self.event_bus.emit_lossy(event);
        }
    }
}

pub(crate) async fn remove_output_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove output directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_limit_clamped() {
        let settings = JobSettings::new("/tmp");
        assert_eq!(settings.effective_track_limit(None), 50);
        assert_eq!(settings.effective_track_limit(Some(0)), 50);
        assert_eq!(settings.effective_track_limit(Some(-3)), 50);
        assert_eq!(settings.effective_track_limit(Some(10)), 10);
        assert_eq!(settings.effective_track_limit(Some(500)), 50);
    }
}
