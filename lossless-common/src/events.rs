//! Event types for the lossless event system
//!
//! Provides shared event definitions and the EventBus used to fan job
//! progress out to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle status of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change status again
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Download service events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DlEvent {
    /// A job was accepted and its workers spawned
    JobCreated {
        job_id: Uuid,
        playlist_name: String,
        total_tracks: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job status transition (running → paused, → completed, ...)
    JobStatusChanged {
        job_id: Uuid,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// A worker picked up a track
    TrackStarted {
        job_id: Uuid,
        track: String,
        timestamp: DateTime<Utc>,
    },

    /// Transfer state or percentage changed for the current track
    DownloadProgress {
        job_id: Uuid,
        track: String,
        state: String,
        percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// Track saved to the job output directory
    TrackCompleted {
        job_id: Uuid,
        track: String,
        file_index: usize,
        processed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Track could not be resolved
    TrackFailed {
        job_id: Uuid,
        track: String,
        message: String,
        processed: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Human-readable job log line
    JobLog {
        job_id: Uuid,
        line: String,
        timestamp: DateTime<Utc>,
    },
}

impl DlEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            DlEvent::JobCreated { .. } => "JobCreated",
            DlEvent::JobStatusChanged { .. } => "JobStatusChanged",
            DlEvent::TrackStarted { .. } => "TrackStarted",
            DlEvent::DownloadProgress { .. } => "DownloadProgress",
            DlEvent::TrackCompleted { .. } => "TrackCompleted",
            DlEvent::TrackFailed { .. } => "TrackFailed",
            DlEvent::JobLog { .. } => "JobLog",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            DlEvent::JobCreated { job_id, .. }
            | DlEvent::JobStatusChanged { job_id, .. }
            | DlEvent::TrackStarted { job_id, .. }
            | DlEvent::DownloadProgress { job_id, .. }
            | DlEvent::TrackCompleted { job_id, .. }
            | DlEvent::TrackFailed { job_id, .. }
            | DlEvent::JobLog { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for [`DlEvent`]s.
///
/// Cloning is cheap; all clones share one channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DlEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DlEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DlEvent) -> Result<usize, broadcast::error::SendError<DlEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DlEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
