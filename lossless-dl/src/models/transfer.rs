//! Transfer attempt state machine
//!
//! queued → in_progress → {completed | failed | timed_out}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Queued,
    InProgress,
    Completed,
    Failed,
    TimedOut,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::TimedOut
        )
    }

    /// Whether `self → next` is a legal move. A successful enqueue moves
    /// `Queued` to `InProgress`; a rejected enqueue is the only way to fail
    /// straight from `Queued`.
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, TimedOut)
        )
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferState::Queued => "queued",
            TransferState::InProgress => "in_progress",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// One enqueue-to-terminal lifecycle for a (track, candidate) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub candidate: Candidate,
    pub state: TransferState,
    /// Raw state string reported by the peer backend
    pub backend_state: String,
    pub percent: f64,
    pub started_at: DateTime<Utc>,
}

impl TransferAttempt {
    pub fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            state: TransferState::Queued,
            backend_state: String::new(),
            percent: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Apply a transition, returning `false` (and leaving state untouched)
    /// when it would skip or rewind a state
    pub fn transition_to(&mut self, next: TransferState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}
