//! Error types for the storage ports.

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by storage backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A file-backed store could not be read or written.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend itself failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}
