//! Test Helper Utilities
//!
//! Shared utilities for lossless-dl integration tests

pub mod mock_backend;

pub use mock_backend::{peer, MockBackend, TransferScript};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lossless_common::events::EventBus;
use lossless_dl::services::{
    JobManager, JobSettings, SearchClient, SearchSettings, SearchThrottle, TrackResolver,
    TransferOrchestrator, TransferSettings,
};
use lossless_dl::{ApiOptions, AppState, Components};

/// Settings with millisecond poll intervals so tests finish quickly
pub fn fast_components(download_dir: &Path, output_root: &Path, transfer_timeout: Duration) -> Components {
    let search = SearchSettings {
        timeout: Duration::from_millis(500),
        retry_base_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        ..SearchSettings::default()
    };
    let transfer = TransferSettings {
        poll_interval: Duration::from_millis(10),
        enqueue_retry_delay: Duration::from_millis(5),
        ..TransferSettings::new(download_dir)
    };
    let mut jobs = JobSettings::new(output_root);
    jobs.workers_per_job = 4;

    Components {
        search,
        search_min_interval: Duration::ZERO,
        transfer,
        transfer_timeout,
        jobs,
        api: ApiOptions {
            manual_transfer_timeout: transfer_timeout,
            ..ApiOptions::default()
        },
    }
}

/// Resolver wired onto `backend` with fast settings
pub fn build_resolver(backend: Arc<MockBackend>, components: &Components) -> Arc<TrackResolver> {
    let throttle = SearchThrottle::shared(components.search_min_interval);
    let search = Arc::new(SearchClient::new(
        backend.clone(),
        throttle,
        components.search.clone(),
    ));
    let transfers = Arc::new(TransferOrchestrator::new(backend, components.transfer.clone()));
    Arc::new(TrackResolver::new(search, transfers, components.transfer_timeout))
}

/// Job manager on top of `backend`, plus the bus it publishes on
pub fn build_job_manager(backend: Arc<MockBackend>, components: Components) -> (Arc<JobManager>, EventBus) {
    let resolver = build_resolver(backend, &components);
    let event_bus = EventBus::new(1000);
    let manager = Arc::new(JobManager::new(resolver, event_bus.clone(), components.jobs));
    (manager, event_bus)
}

/// Full application state for router tests
pub fn build_state(backend: Arc<MockBackend>, components: Components) -> AppState {
    AppState::new(backend, EventBus::new(1000), components)
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
