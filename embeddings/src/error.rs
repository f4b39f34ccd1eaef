//! Error types for the embeddings client.

use ragbridge_bridge::BridgeError;
use ragbridge_store::StoreError;
use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while computing embeddings.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The request could not be delivered.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The inference service answered with an error status.
    #[error("inference service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Invalid response from the inference service.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Cache backend failure.
    #[error("cache error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
