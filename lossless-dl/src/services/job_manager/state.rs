//! Per-job mutable state
//!
//! Every mutation goes through a method on [`JobHandle`] that holds the
//! state lock for its whole update, so snapshots never observe a half
//! applied outcome (`processed_tracks == ok_count + fail_count`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lossless_common::events::DlEvent;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    DownloadPreferences, FailedTrack, JobSnapshot, JobStatus, Track, TrackKey,
};

pub(crate) struct JobState {
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
    pub logs: VecDeque<String>,
    pub log_capacity: usize,
    pub failed_tracks: Vec<FailedTrack>,
    /// Paths relative to the output root
    pub files: Vec<String>,
    pub served: HashSet<usize>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Tracks currently inside the resolution pipeline
    pub in_flight: usize,
    pub pause_requested: bool,
}

impl JobState {
    fn push_log(&mut self, line: String) {
        if self.log_capacity == 0 {
            return;
        }
        while self.logs.len() >= self.log_capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn set_status(&mut self, job_id: Uuid, new_status: JobStatus, events: &mut Vec<DlEvent>) {
        if self.status == new_status {
            return;
        }
        let old_status = self.status;
        self.status = new_status;
        if new_status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        events.push(DlEvent::JobStatusChanged {
            job_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    }

    /// Pause takes effect once no worker is mid-track
    fn settle_pause(&mut self, job_id: Uuid, events: &mut Vec<DlEvent>) {
        if self.pause_requested && self.in_flight == 0 && self.status == JobStatus::Running {
            self.set_status(job_id, JobStatus::Paused, events);
            self.push_log("Job paused".to_string());
        }
    }
}

/// Result of asking to start a track
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BeginTrack {
    Started,
    /// A pause was requested after the worker passed the pause gate
    Paused,
    Stopped,
}

/// How a worker's track ended
pub(crate) enum TrackOutcome {
    Saved(PathBuf),
    Unresolved(FailedTrack),
    Cancelled,
}

pub(crate) struct JobHandle {
    pub id: Uuid,
    pub output_root: PathBuf,
    pub output_dir: PathBuf,
    pub cancel: CancellationToken,
    state: Mutex<JobState>,
    pause_tx: watch::Sender<bool>,
    track_locks: Mutex<HashMap<TrackKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobHandle {
    pub fn new(
        id: Uuid,
        output_root: &Path,
        playlist_name: String,
        preferences: DownloadPreferences,
        total_tracks: usize,
        log_capacity: usize,
    ) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            id,
            output_root: output_root.to_path_buf(),
            output_dir: output_root.join(id.to_string()),
            cancel: CancellationToken::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                playlist_name,
                preferences,
                total_tracks,
                processed_tracks: 0,
                ok_count: 0,
                fail_count: 0,
                current_track_name: String::new(),
                current_download_state: String::new(),
                current_download_percent: 0.0,
                logs: VecDeque::with_capacity(log_capacity),
                log_capacity,
                failed_tracks: Vec::new(),
                files: Vec::new(),
                served: HashSet::new(),
                created_at: Utc::now(),
                finished_at: None,
                in_flight: 0,
                pause_requested: false,
            }),
            pause_tx,
            track_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock();
        let end = state.finished_at.unwrap_or_else(Utc::now);
        let pending_files = (0..state.files.len())
            .filter(|i| !state.served.contains(i))
            .collect();
        JobSnapshot {
            id: self.id,
            status: state.status,
            playlist_name: state.playlist_name.clone(),
            preferences: state.preferences.clone(),
            total_tracks: state.total_tracks,
            processed_tracks: state.processed_tracks,
            ok_count: state.ok_count,
            fail_count: state.fail_count,
            current_track_name: state.current_track_name.clone(),
            current_download_state: state.current_download_state.clone(),
            current_download_percent: state.current_download_percent,
            logs: state.logs.iter().cloned().collect(),
            failed_tracks: state.failed_tracks.clone(),
            files: state.files.clone(),
            pending_files,
            created_at: state.created_at,
            finished_at: state.finished_at,
            elapsed_seconds: (end - state.created_at).num_seconds().max(0) as u64,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    pub fn preferences(&self) -> DownloadPreferences {
        self.state.lock().preferences.clone()
    }

    /// Relative file path at `index`
    pub fn file_at(&self, index: usize) -> Option<String> {
        self.state.lock().files.get(index).cloned()
    }

    pub fn files_with_served(&self) -> Vec<(String, bool)> {
        let state = self.state.lock();
        state
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), state.served.contains(&i)))
            .collect()
    }

    /// Returns the line as a `JobLog` event for the caller to publish
    pub fn log(&self, line: impl Into<String>) -> DlEvent {
        let line = line.into();
        self.state.lock().push_log(line.clone());
        DlEvent::JobLog {
            job_id: self.id,
            line,
            timestamp: Utc::now(),
        }
    }

    pub fn set_progress(&self, download_state: &str, percent: f64) -> String {
        let mut state = self.state.lock();
        state.current_download_state = download_state.to_string();
        state.current_download_percent = percent;
        state.current_track_name.clone()
    }

    pub fn pause_receiver(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }

    /// Per-track-identity lock; one transfer at a time per key
    pub fn track_lock(&self, key: TrackKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.track_locks.lock().entry(key).or_default())
    }

    /// Request a pause; `Err` carries the status of a finished job
    pub fn request_pause(&self) -> Result<Vec<DlEvent>, JobStatus> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return Err(state.status);
            }
            state.pause_requested = true;
            state.settle_pause(self.id, &mut events);
        }
        self.pause_tx.send_replace(true);
        Ok(events)
    }

    pub fn request_resume(&self) -> Result<Vec<DlEvent>, JobStatus> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return Err(state.status);
            }
            state.pause_requested = false;
            if state.status == JobStatus::Paused {
                state.set_status(self.id, JobStatus::Running, &mut events);
                state.push_log("Job resumed".to_string());
            }
        }
        self.pause_tx.send_replace(false);
        Ok(events)
    }

    /// Fire the token, drop the file list and mark the job cancelled.
    ///
    /// Returns no events when the job was already cancelled.
    pub fn mark_cancelled(&self) -> Vec<DlEvent> {
        self.cancel.cancel();
        let mut events = Vec::new();
        let mut state = self.state.lock();
        if state.status != JobStatus::Cancelled {
            state.set_status(self.id, JobStatus::Cancelled, &mut events);
            state.push_log("Job cancelled".to_string());
        }
        state.files.clear();
        state.served.clear();
        state.current_download_state.clear();
        state.current_download_percent = 0.0;
        events
    }

    pub fn try_begin_track(&self, track: &Track) -> (BeginTrack, Vec<DlEvent>) {
        let mut events = Vec::new();
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() || state.status.is_terminal() {
            return (BeginTrack::Stopped, events);
        }
        if state.pause_requested {
            return (BeginTrack::Paused, events);
        }
        state.in_flight += 1;
        state.current_track_name = track.display_name();
        state.current_download_state.clear();
        state.current_download_percent = 0.0;
        events.push(DlEvent::TrackStarted {
            job_id: self.id,
            track: track.display_name(),
            timestamp: Utc::now(),
        });
        (BeginTrack::Started, events)
    }

    /// Record how a started track ended, all under one lock
    pub fn record_outcome(&self, track: &Track, outcome: TrackOutcome) -> Vec<DlEvent> {
        let mut events = Vec::new();
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let cancelled = state.status == JobStatus::Cancelled;
        match outcome {
            TrackOutcome::Saved(path) if !cancelled => {
                let relative = path
                    .strip_prefix(&self.output_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| {
                        PathBuf::from(self.id.to_string()).join(path.file_name().unwrap_or_default())
                    });
                state.files.push(relative.to_string_lossy().into_owned());
                state.ok_count += 1;
                state.processed_tracks += 1;
                events.push(DlEvent::TrackCompleted {
                    job_id: self.id,
                    track: track.display_name(),
                    file_index: state.files.len() - 1,
                    processed: state.processed_tracks,
                    total: state.total_tracks,
                    timestamp: Utc::now(),
                });
            }
            TrackOutcome::Unresolved(failed) if !cancelled => {
                let message = failed.message.clone();
                state.failed_tracks.push(failed);
                state.fail_count += 1;
                state.processed_tracks += 1;
                events.push(DlEvent::TrackFailed {
                    job_id: self.id,
                    track: track.display_name(),
                    message,
                    processed: state.processed_tracks,
                    total: state.total_tracks,
                    timestamp: Utc::now(),
                });
            }
            // Cancelled, or the job was cancelled while this track ran
            _ => {}
        }

        state.settle_pause(self.id, &mut events);
        events
    }

    /// Final status once every worker has returned
    pub fn finish(&self) -> Vec<DlEvent> {
        let mut events = Vec::new();
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return events;
        }
        let status = if state.total_tracks == 0 || state.fail_count < state.total_tracks {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        state.current_track_name.clear();
        state.current_download_state.clear();
        state.current_download_percent = 0.0;
        let summary = format!(
            "Job finished: {} ok, {} failed of {}",
            state.ok_count, state.fail_count, state.total_tracks
        );
        state.push_log(summary);
        state.set_status(self.id, status, &mut events);
        events
    }

    /// Mark indices as fetched; out-of-range indices are ignored
    pub fn mark_served(&self, indices: &[usize]) {
        let mut state = self.state.lock();
        let len = state.files.len();
        state.served.extend(indices.iter().copied().filter(|i| *i < len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FormatTag;

    fn handle(total: usize) -> JobHandle {
        JobHandle::new(
            Uuid::new_v4(),
            Path::new("/tmp/out"),
            "Mix".to_string(),
            DownloadPreferences::new(vec![FormatTag::Flac], false, 4),
            total,
            3,
        )
    }

    fn track(n: usize) -> Track {
        Track::new("Artist", format!("Song {}", n), "")
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let h = handle(0);
        for i in 0..5 {
            h.log(format!("line {}", i));
        }
        assert_eq!(h.snapshot().logs, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_outcomes_keep_counters_consistent() {
        let h = handle(2);
        let t0 = track(0);
        let t1 = track(1);

        assert_eq!(h.try_begin_track(&t0).0, BeginTrack::Started);
        h.record_outcome(&t0, TrackOutcome::Saved(h.output_dir.join("Artist - Song 0.flac")));
        assert_eq!(h.try_begin_track(&t1).0, BeginTrack::Started);
        h.record_outcome(
            &t1,
            TrackOutcome::Unresolved(FailedTrack::new(&t1, "No sources found", vec![], vec![])),
        );

        let snap = h.snapshot();
        assert_eq!(snap.processed_tracks, snap.ok_count + snap.fail_count);
        assert_eq!(snap.files, vec![format!("{}/Artist - Song 0.flac", h.id)]);
        assert_eq!(snap.pending_files, vec![0]);

        h.finish();
        assert_eq!(h.status(), JobStatus::Completed);
        assert!(h.finished_at().is_some());
    }

    #[test]
    fn test_all_failed_is_failed() {
        let h = handle(1);
        let t = track(0);
        h.try_begin_track(&t);
        h.record_outcome(&t, TrackOutcome::Unresolved(FailedTrack::new(&t, "x", vec![], vec![])));
        h.finish();
        assert_eq!(h.status(), JobStatus::Failed);
    }

    #[test]
    fn test_pause_waits_for_in_flight() {
        let h = handle(2);
        let t = track(0);
        h.try_begin_track(&t);

        h.request_pause().unwrap();
        assert_eq!(h.status(), JobStatus::Running);
        assert_eq!(h.try_begin_track(&track(1)).0, BeginTrack::Paused);

        let events = h.record_outcome(&t, TrackOutcome::Saved(h.output_dir.join("a.flac")));
        assert_eq!(h.status(), JobStatus::Paused);
        assert!(events
            .iter()
            .any(|e| matches!(e, DlEvent::JobStatusChanged { new_status: JobStatus::Paused, .. })));

        h.request_resume().unwrap();
        assert_eq!(h.status(), JobStatus::Running);
    }

    #[test]
    fn test_outcome_after_cancel_not_recorded() {
        let h = handle(1);
        let t = track(0);
        h.try_begin_track(&t);
        h.mark_cancelled();
        h.record_outcome(&t, TrackOutcome::Saved(h.output_dir.join("a.flac")));

        let snap = h.snapshot();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert!(snap.files.is_empty());
        assert_eq!(snap.processed_tracks, 0);
        assert!(h.request_pause().is_err());
        assert_eq!(h.try_begin_track(&t).0, BeginTrack::Stopped);
    }

    #[test]
    fn test_mark_served_ignores_out_of_range() {
        let h = handle(1);
        let t = track(0);
        h.try_begin_track(&t);
        h.record_outcome(&t, TrackOutcome::Saved(h.output_dir.join("a.flac")));
        h.mark_served(&[0, 7]);
        let snap = h.snapshot();
        assert!(snap.pending_files.is_empty());
        assert_eq!(h.files_with_served(), vec![(snap.files[0].clone(), true)]);
    }
}
