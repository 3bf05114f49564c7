//! Data models for lossless-dl
//!
//! - Track identity and query variants
//! - Candidates and format tags
//! - Transfer attempt state machine
//! - Job snapshots and per-job preferences

pub mod candidate;
pub mod job;
pub mod preferences;
pub mod track;
pub mod transfer;

pub use candidate::{Candidate, FormatTag, LosslessExtensions};
pub use job::{FailedTrack, JobFile, JobSnapshot, JobStatus, TriedCandidate};
pub use preferences::{DownloadPreferences, FormatPreferenceInput};
pub use track::{Track, TrackKey};
pub use transfer::{TransferAttempt, TransferState};
