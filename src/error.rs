//! Error handling for the expiry countdown

use std::fmt;
use thiserror::Error;

use expiry_countdown_push::PushError;
use expiry_countdown_store::StoreError;

/// Unified error type for a countdown run
#[derive(Error, Debug)]
pub enum Error {
    /// Inventory, user or notification store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Push transport errors
    #[error("Push error: {0}")]
    Push(#[from] PushError),

    /// HTTP client setup errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Both candidate queries failed
    #[error("Scan failed: {0}")]
    Scan(String),

    /// Errors raised by a non-HTTP backend
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new backend error
    pub fn backend<T: fmt::Display>(msg: T) -> Self {
        Error::Backend(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
