//! Process-wide throttle for peer backend searches
//!
//! One instance per process, shared by handle with every search client so
//! all jobs and workers draw from the same budget. Callers over the limit
//! wait for their turn instead of failing.

use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Enforces a minimum spacing between backend calls
pub struct SearchThrottle {
    limiter: Option<DirectLimiter>,
    min_interval: Duration,
}

impl SearchThrottle {
    /// A zero interval disables throttling (used by tests)
    pub fn new(min_interval: Duration) -> Self {
        // Burst of one: every call must wait a full period after the previous
        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            limiter,
            min_interval,
        }
    }

    pub fn shared(min_interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(min_interval))
    }

    /// Wait until the next call is allowed
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl std::fmt::Debug for SearchThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchThrottle")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
