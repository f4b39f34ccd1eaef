//! Embedding providers.
//!
//! The production provider calls the inference service's embeddings
//! endpoint through an [`HttpTransport`], which in deployment is the remote
//! bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragbridge_bridge::{HttpRequest, HttpTransport, redact_for_log};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Request for generating an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,

    /// Model to use; the provider default when unset.
    pub model: Option<String>,
}

impl EmbeddingRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    pub dimension: usize,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;
}

/// Inference service reached through an [`HttpTransport`].
///
/// Speaks the `POST /api/embeddings` `{model, prompt}` API and accepts
/// either an `embedding` vector or an `embeddings` list in the reply.
pub struct RemoteInferenceProvider {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl RemoteInferenceProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: "mxbai-embed-large".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct InferenceEmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[async_trait]
impl EmbeddingProvider for RemoteInferenceProvider {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request.model.unwrap_or_else(|| self.default_model.clone());
        debug!("Generating embedding with model: {model}");

        let body = serde_json::json!({
            "model": model,
            "prompt": request.text,
        });
        let http = HttpRequest::post_json(format!("{}/api/embeddings", self.base_url), &body)
            .with_timeout(self.timeout);

        let response = self.transport.send(http).await?;
        if !response.is_success() {
            return Err(EmbeddingError::Http {
                status: response.status,
                body: redact_for_log(&response.body, 500),
            });
        }

        let parsed: InferenceEmbeddingResponse = response.json()?;
        let embedding = parsed
            .embedding
            .or_else(|| parsed.embeddings.and_then(|list| list.into_iter().next()))
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?;

        let dimension = embedding.len();
        Ok(EmbeddingResponse {
            embedding,
            model,
            dimension,
        })
    }
}
