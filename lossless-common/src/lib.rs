//! # lossless-common
//!
//! Shared code for the lossless download services:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Event types (DlEvent enum) and the EventBus
//! - SSE helpers
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
