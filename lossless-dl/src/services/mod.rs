//! Download services
//!
//! Leaf first: ranking, throttle and peer backend, search adapter, transfer
//! orchestrator, track resolver, job manager.

pub mod job_manager;
pub mod ranking;
pub mod search_client;
pub mod slskd_client;
pub mod throttle;
pub mod track_resolver;
pub mod transfer;

pub use job_manager::{spawn_sweeper, JobError, JobManager, JobSettings, ResolvedFile};
pub use ranking::rank;
pub use search_client::{SearchClient, SearchError, SearchSettings};
pub use slskd_client::{BackendError, PeerBackend, SlskdClient};
pub use throttle::SearchThrottle;
pub use track_resolver::{NullSink, ResolveError, ResolveSink, TrackResolver, TrackUnresolved};
pub use transfer::{TransferError, TransferOrchestrator, TransferSettings};

use crate::models::Track;

/// Source of playlist track lists (metadata service boundary)
#[async_trait::async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, BackendError>;
}
