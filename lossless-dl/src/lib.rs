//! lossless-dl library interface
//!
//! Playlist downloader engine: searches a peer network for each track,
//! ranks candidates by format preference and peer quality, drives the
//! transfer and files the result into a per-job output directory.
//!
//! Exposed as a library for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use lossless_common::events::EventBus;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::services::{
    JobManager, JobSettings, PeerBackend, PlaylistSource, SearchClient, SearchSettings,
    SearchThrottle, TrackResolver, TransferOrchestrator, TransferSettings,
};

/// Request defaults the HTTP layer applies
#[derive(Debug, Clone)]
pub struct ApiOptions {
    /// Transfer attempts per track when a request does not say
    pub max_retries: usize,
    /// Timeout for single-candidate manual downloads
    pub manual_transfer_timeout: Duration,
    /// Candidates returned per track by the preview endpoint
    pub candidate_limit: usize,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            manual_transfer_timeout: Duration::from_secs(1800),
            candidate_limit: 5,
        }
    }
}

/// Settings for every service component, independent of where they came from
#[derive(Debug, Clone)]
pub struct Components {
    pub search: SearchSettings,
    pub search_min_interval: Duration,
    pub transfer: TransferSettings,
    pub transfer_timeout: Duration,
    pub jobs: JobSettings,
    pub api: ApiOptions,
}

impl Components {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            search: config.search_settings(),
            search_min_interval: config.search_min_interval(),
            transfer: config.transfer_settings(),
            transfer_timeout: config.transfer_timeout(),
            jobs: config.job_settings(),
            api: ApiOptions {
                max_retries: config.jobs.max_retries,
                manual_transfer_timeout: config.manual_transfer_timeout(),
                ..ApiOptions::default()
            },
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobManager>,
    pub transfers: Arc<TransferOrchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Metadata service, when one is wired in
    pub playlist_source: Option<Arc<dyn PlaylistSource>>,
    pub options: ApiOptions,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire every component on top of one peer backend
    pub fn new(backend: Arc<dyn PeerBackend>, event_bus: EventBus, components: Components) -> Self {
        let throttle = SearchThrottle::shared(components.search_min_interval);
        tracing::debug!(
            min_interval_ms = throttle.min_interval().as_millis() as u64,
            "Search throttle ready"
        );
        let search = Arc::new(SearchClient::new(Arc::clone(&backend), throttle, components.search));
        let transfers = Arc::new(TransferOrchestrator::new(backend, components.transfer));
        let resolver = Arc::new(TrackResolver::new(
            search,
            Arc::clone(&transfers),
            components.transfer_timeout,
        ));
        let jobs = Arc::new(JobManager::new(resolver, event_bus.clone(), components.jobs));

        Self {
            jobs,
            transfers,
            event_bus,
            playlist_source: None,
            options: components.api,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_playlist_source(mut self, source: Arc<dyn PlaylistSource>) -> Self {
        self.playlist_source = Some(source);
        self
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .merge(api::file_routes())
        .merge(api::candidate_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
