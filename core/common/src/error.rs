//! Common error types for the encrypted sync cache.

use thiserror::Error;

/// Top-level error type for cache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote delta feed could not be reached or returned garbage.
    ///
    /// Covers network failures, timeouts, HTTP error statuses and
    /// malformed payloads alike.
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    /// A stored blob failed integrity verification or could not be decoded.
    #[error("Cache corrupted: {0}")]
    CacheCorrupted(String),

    /// No session key is installed.
    #[error("Cache key unavailable")]
    KeyUnavailable,

    /// A sync this caller coalesced onto finished in error.
    #[error("Sync of {collection} failed: {message}")]
    SyncFailed { collection: String, message: String },

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::FeedUnavailable(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
