//! # Embeddings
//!
//! Text embeddings computed by a remote inference service. Requests travel
//! through an [`HttpTransport`](ragbridge_bridge::HttpTransport), normally
//! the remote bridge, and results are cached by content hash.
//!
//! ## Architecture
//!
//! ```text
//! EmbeddingClient ──► EmbeddingCache ──► Cache port
//!        │
//!        ▼
//! EmbeddingProvider ──► HttpTransport ──► inference service
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod provider;

pub use cache::{CacheStats, EmbeddingCache};
pub use client::EmbeddingClient;
pub use config::EmbeddingConfig;
pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, RemoteInferenceProvider};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 1024;
