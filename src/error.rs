//! Error types for the Tollgate filter.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A counter could not be read and the filter is not fault tolerant
    #[error("Failed to get usage for {key}: {source}")]
    StoreRead {
        key: String,
        #[source]
        source: StoreError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
