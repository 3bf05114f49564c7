//! HTTP API handlers for lossless-dl

pub mod candidates;
pub mod files;
pub mod health;
pub mod jobs;
pub mod sse;

pub use candidates::candidate_routes;
pub use files::file_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;
