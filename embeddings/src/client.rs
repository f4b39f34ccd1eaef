//! The embedding client used by the retrieval pipeline.

use std::sync::Arc;

use ragbridge_bridge::HttpTransport;
use ragbridge_store::Cache;
use tracing::{debug, warn};

use crate::Embedding;
use crate::cache::{CacheStats, EmbeddingCache};
use crate::config::EmbeddingConfig;
use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingRequest, RemoteInferenceProvider};

/// Converts text to fixed-dimension vectors, with caching.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    /// Client backed by the inference service behind `transport`.
    pub fn new(config: EmbeddingConfig, transport: Arc<dyn HttpTransport>, cache: Arc<dyn Cache>) -> Self {
        let provider = RemoteInferenceProvider::new(transport, config.base_url.clone())
            .with_model(config.model.clone())
            .with_timeout(config.timeout());
        Self::with_provider(config, Arc::new(provider), cache)
    }

    /// Client backed by an arbitrary provider.
    pub fn with_provider(
        config: EmbeddingConfig,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let cache = EmbeddingCache::new(cache, config.cache_ttl());
        Self {
            provider,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// The all-zero vector of the configured dimension.
    pub fn zero_vector(&self) -> Embedding {
        vec![0.0; self.config.dimension]
    }

    /// Embed `text`.
    ///
    /// Empty or whitespace-only text yields the zero vector without a
    /// network call. A vector of unexpected length is logged and returned
    /// as is.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            debug!("Empty text; returning zero vector");
            return Ok(self.zero_vector());
        }

        let model = self.config.model.as_str();
        if let Some(embedding) = self.cache.get(text, model).await {
            debug!("Cache hit for embedding");
            return Ok(embedding);
        }

        let response = self
            .provider
            .embed(EmbeddingRequest::new(text).with_model(model))
            .await?;

        if response.dimension != self.config.dimension {
            warn!(
                "Embedding dimension mismatch: expected {}, got {} (model {})",
                self.config.dimension, response.dimension, response.model
            );
        }

        self.cache.put(text, model, &response.embedding).await;
        Ok(response.embedding)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragbridge_bridge::testing::ScriptedTransport;
    use ragbridge_bridge::{BridgeError, HttpResponse};
    use ragbridge_store::MemoryCache;

    fn client(transport: &ScriptedTransport, dimension: usize) -> EmbeddingClient {
        EmbeddingClient::new(
            EmbeddingConfig::default().with_dimension(dimension),
            Arc::new(transport.clone()),
            Arc::new(MemoryCache::default()),
        )
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector_without_calls() {
        let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, "{}")));
        let client = client(&transport, 1024);

        for text in ["", "   ", "\n\t"] {
            let vector = client.embed(text).await.unwrap();
            assert_eq!(vector.len(), 1024);
            assert!(vector.iter().all(|v| *v == 0.0));
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_call_is_cached() {
        let transport =
            ScriptedTransport::new(|_| Ok(HttpResponse::new(200, r#"{"embedding":[0.1,0.2,0.3]}"#)));
        let client = client(&transport, 3);

        let first = client.embed("What is the budget?").await.unwrap();
        let second = client.embed("What is the budget?").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.count("/api/embeddings"), 1);

        client.embed("Another question").await.unwrap();
        assert_eq!(transport.count("/api/embeddings"), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_does_not_fail() {
        let transport =
            ScriptedTransport::new(|_| Ok(HttpResponse::new(200, r#"{"embedding":[0.1,0.2]}"#)));
        let client = client(&transport, 1024);
        let vector = client.embed("text").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let transport = ScriptedTransport::new(|_| {
            Err(BridgeError::Timeout {
                operation: "remote command".to_string(),
                timeout_secs: 30,
            })
        });
        let client = client(&transport, 3);
        assert!(client.embed("text").await.is_err());
        assert!(client.embed("text").await.is_err());
        assert_eq!(transport.count("/api/embeddings"), 2);
    }

    #[derive(Default)]
    struct RecordingProvider {
        models: std::sync::Mutex<Vec<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed(&self, request: EmbeddingRequest) -> Result<crate::EmbeddingResponse> {
            self.models.lock().unwrap().push(request.model.clone());
            Ok(crate::EmbeddingResponse {
                embedding: vec![1.0, 0.0],
                model: request.model.unwrap_or_default(),
                dimension: 2,
            })
        }
    }

    #[tokio::test]
    async fn test_custom_provider_gets_configured_model() {
        let provider = Arc::new(RecordingProvider::default());
        let config = EmbeddingConfig::default().with_dimension(2);
        let model = config.model.clone();
        let client =
            EmbeddingClient::with_provider(config, provider.clone(), Arc::new(MemoryCache::default()));

        assert_eq!(client.embed("text").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(client.embed("text").await.unwrap(), vec![1.0, 0.0]);

        assert_eq!(*provider.models.lock().unwrap(), vec![Some(model)]);
        let stats = client.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }
}
