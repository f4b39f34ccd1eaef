//! Configuration for the embeddings client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_DIMENSION;

/// Configuration for computing embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Inference service base URL as seen from the remote host.
    pub base_url: String,

    /// Embedding model.
    pub model: String,

    /// Expected vector length.
    pub dimension: usize,

    /// How long computed embeddings stay cached.
    pub cache_ttl_secs: u64,

    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "mxbai-embed-large".to_string(),
            dimension: DEFAULT_DIMENSION,
            cache_ttl_secs: 3600,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
