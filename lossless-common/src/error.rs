//! Shared error type for start-up and configuration code

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing, unreadable or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
