//! Error types for Sluice.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded acquire gave up before a permit was granted
    #[error("Timed out after {0:?} waiting for a permit")]
    Timeout(Duration),

    /// The pump went away before granting a queued waiter
    #[error("Limiter closed before the permit was granted")]
    Closed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, SluiceError>;
