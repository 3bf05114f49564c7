//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Whole seconds elapsed since `since`, clamped at zero
pub fn elapsed_seconds(since: DateTime<Utc>) -> u64 {
    (Utc::now() - since).num_seconds().max(0) as u64
}
