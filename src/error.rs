//! Error types for the Warden engine.

use thiserror::Error;

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors (malformed sidecar files, bad metadata)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Service/ability registration errors (duplicate names, unbound handles)
    #[error("Service error: {0}")]
    Service(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
