//! Error types for the vector store client.

use ragbridge_bridge::BridgeError;
use ragbridge_store::StoreError;
use thiserror::Error;

/// Result type alias for vector store operations.
pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Errors that can occur while querying the vector database.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// The request could not be delivered.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// A filter or parameter was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The database answered with an error status.
    #[error("vector store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The query was rejected.
    #[error("query failed: {0}")]
    Query(String),

    /// The reply did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Cache backend failure.
    #[error("cache error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
