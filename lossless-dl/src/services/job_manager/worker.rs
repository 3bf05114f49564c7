//! Job runner: bounded workers pulling tracks through the pipeline

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use lossless_common::events::{DlEvent, EventBus};
use tokio::sync::Semaphore;

use super::state::{BeginTrack, JobHandle, TrackOutcome};
use crate::models::{DownloadPreferences, Track};
use crate::services::track_resolver::{ResolveError, ResolveSink, TrackResolver};

/// Everything a job's workers share
#[derive(Clone)]
pub(crate) struct JobContext {
    pub handle: Arc<JobHandle>,
    pub resolver: Arc<TrackResolver>,
    pub event_bus: EventBus,
    /// Process-wide cap on tracks in flight across all jobs
    pub track_slots: Arc<Semaphore>,
}

impl JobContext {
    pub fn publish(&self, events: Vec<DlEvent>) {
        for event in events {
            self.event_bus.emit_lossy(event);
        }
    }

    pub fn log(&self, line: impl Into<String>) {
        let event = self.handle.log(line);
        self.event_bus.emit_lossy(event);
    }
}

/// Routes pipeline output into the job log and progress fields
struct JobSink<'a> {
    ctx: &'a JobContext,
}

impl ResolveSink for JobSink<'_> {
    fn log(&self, line: &str) {
        self.ctx.log(line);
    }

    fn progress(&self, state: &str, percent: f64) {
        let track = self.ctx.handle.set_progress(state, percent);
        self.ctx.event_bus.emit_lossy(DlEvent::DownloadProgress {
            job_id: self.ctx.handle.id,
            track,
            state: state.to_string(),
            percent,
            timestamp: Utc::now(),
        });
    }
}

/// Run every track with at most `workers` in parallel, then settle the
/// job's final status. Cancelled jobs get their output directory removed
/// again once all workers are gone.
pub(crate) async fn run_job(ctx: JobContext, tracks: Vec<Track>, workers: usize) {
    let job_id = ctx.handle.id;
    let total = tracks.len();
    let preferences = ctx.handle.preferences();
    tracing::info!(job_id = %job_id, tracks = total, workers, "Job started");

    stream::iter(tracks)
        .map(|track| {
            let ctx = ctx.clone();
            let preferences = preferences.clone();
            async move { run_track(&ctx, &track, &preferences).await }
        })
        .buffer_unordered(workers.max(1))
        .collect::<Vec<()>>()
        .await;

    if ctx.handle.cancel.is_cancelled() {
        super::remove_output_dir(&ctx.handle.output_dir).await;
        tracing::info!(job_id = %job_id, "Job cancelled");
        return;
    }

    let events = ctx.handle.finish();
    ctx.publish(events);
    let snapshot = ctx.handle.snapshot();
    tracing::info!(
        job_id = %job_id,
        status = %snapshot.status,
        ok = snapshot.ok_count,
        failed = snapshot.fail_count,
        "Job finished"
    );
}

async fn run_track(ctx: &JobContext, track: &Track, preferences: &DownloadPreferences) {
    let handle = &ctx.handle;
    let mut pause_rx = handle.pause_receiver();

    let (_permit, _key_guard) = loop {
        // Pause gate
        loop {
            if handle.cancel.is_cancelled() {
                return;
            }
            if !*pause_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = handle.cancel.cancelled() => return,
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let permit = tokio::select! {
            _ = handle.cancel.cancelled() => return,
            permit = Arc::clone(&ctx.track_slots).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return,
            },
        };

        let key_lock = handle.track_lock(track.key());
        let key_guard = tokio::select! {
            _ = handle.cancel.cancelled() => return,
            guard = key_lock.lock_owned() => guard,
        };

        let (begin, events) = handle.try_begin_track(track);
        ctx.publish(events);
        match begin {
            BeginTrack::Started => break (permit, key_guard),
            BeginTrack::Paused => continue,
            BeginTrack::Stopped => return,
        }
    };

    tracing::debug!(job_id = %handle.id, track = %track, "Track started");
    let sink = JobSink { ctx };
    let result = ctx
        .resolver
        .resolve(track, preferences, &handle.output_dir, &handle.cancel, &sink)
        .await;

    let outcome = match result {
        Ok(path) => TrackOutcome::Saved(path),
        Err(ResolveError::Unresolved(unresolved)) => {
            tracing::info!(job_id = %handle.id, track = %track, reason = %unresolved.message, "Track unresolved");
            TrackOutcome::Unresolved(unresolved.into_failed_track(track))
        }
        Err(ResolveError::Cancelled) => TrackOutcome::Cancelled,
    };

    let events = handle.record_outcome(track, outcome);
    ctx.publish(events);
}
