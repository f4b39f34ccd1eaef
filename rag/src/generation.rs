//! Text generation on the remote inference service.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ragbridge_bridge::{
    BridgeError, CancellationToken, HttpRequest, HttpTransport, redact_for_log, retry,
};
use ragbridge_store::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::metrics::TokenUsage;

const MODELS_KEY: &str = "gen:models";
const ERROR_BODY_CHARS: usize = 300;

/// A model installed on the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub modified_at: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

/// Detail view of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub name: String,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
    /// Context length advertised by the model metadata.
    pub context_length: Option<u64>,
    pub parameters: Option<String>,
    pub template: Option<String>,
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Default, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    size: Option<u64>,
    modified_at: Option<String>,
    #[serde(default)]
    details: DetailsEntry,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsEntry {
    family: Option<String>,
    parameter_size: Option<String>,
    quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShowReply {
    #[serde(default)]
    details: DetailsEntry,
    #[serde(default)]
    model_info: serde_json::Map<String, Value>,
    parameters: Option<String>,
    template: Option<String>,
}

/// One generate record: the whole reply, or one line of a stream.
#[derive(Debug, Default, Deserialize)]
struct GenerateRecord {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    /// Nanoseconds.
    total_duration: Option<u64>,
    /// Nanoseconds.
    eval_duration: Option<u64>,
}

impl GenerateRecord {
    fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
            total_duration_ms: self.total_duration.unwrap_or(0) / 1_000_000,
            generation_duration_ms: self.eval_duration.unwrap_or(0) / 1_000_000,
        }
    }
}

/// Failure of one generation attempt.
#[derive(Debug)]
enum AttemptError {
    Transport(BridgeError),
    Status { status: u16, body: String },
    Malformed(String),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Transport(e) => e.is_transient(),
            AttemptError::Status { status, .. } => *status == 429 || *status >= 500,
            AttemptError::Malformed(_) => false,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "{e}"),
            AttemptError::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            AttemptError::Malformed(message) => write!(f, "malformed reply: {message}"),
        }
    }
}

/// Collects a streamed generation line by line.
#[derive(Default)]
struct StreamState {
    text: String,
    usage: Option<TokenUsage>,
    error: Option<String>,
    unparsed: Option<String>,
}

impl StreamState {
    fn feed(&mut self, line: &str, on_chunk: &mut (dyn for<'l> FnMut(&'l str) + Send)) {
        let record: GenerateRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) => {
                self.unparsed = Some(redact_for_log(line, ERROR_BODY_CHARS));
                return;
            }
        };
        if let Some(error) = record.error {
            self.error = Some(error);
            return;
        }
        if !record.response.is_empty() {
            on_chunk(&record.response);
            self.text.push_str(&record.response);
        }
        if record.done {
            self.usage = Some(record.usage());
        }
    }
}

/// Client for the inference service's generate and model endpoints.
pub struct GenerationClient {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn Cache>,
    config: GenerationConfig,
    model_list_ttl: Duration,
}

impl GenerationClient {
    pub fn new(
        config: GenerationConfig,
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn Cache>,
        model_list_ttl: Duration,
    ) -> Self {
        Self {
            transport,
            cache,
            config,
            model_list_ttl,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Models installed on the service. Cached.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        match self.cache.get_json::<Vec<ModelInfo>>(MODELS_KEY).await {
            Ok(Some(models)) => return Ok(models),
            Ok(None) => {}
            Err(e) => warn!("Cache read for {MODELS_KEY} failed: {e}"),
        }

        let request = HttpRequest::get(self.url("/api/tags")).with_timeout(self.config.timeout());
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(service_error("model list", response.status, &response.body));
        }
        let reply: TagsReply = response.json().map_err(|e| RagError::Generation {
            message: format!("unreadable model list: {e}"),
            attempts: Vec::new(),
        })?;

        let models: Vec<ModelInfo> = reply
            .models
            .into_iter()
            .map(|entry| ModelInfo {
                name: entry.name,
                size: entry.size,
                modified_at: entry.modified_at,
                family: entry.details.family,
                parameter_size: entry.details.parameter_size,
                quantization_level: entry.details.quantization_level,
            })
            .collect();
        debug!("Inference service lists {} model(s)", models.len());

        if let Err(e) = self
            .cache
            .set_json(MODELS_KEY, &models, self.model_list_ttl, &[])
            .await
        {
            warn!("Cache write for {MODELS_KEY} failed: {e}");
        }
        Ok(models)
    }

    /// Forget the cached model list.
    pub async fn invalidate_models(&self) -> Result<()> {
        self.cache.delete(MODELS_KEY).await?;
        Ok(())
    }

    /// Details of one model.
    pub async fn model_details(&self, name: &str) -> Result<ModelDetails> {
        let request = HttpRequest::post_json(self.url("/api/show"), &json!({ "model": name }))
            .with_timeout(self.config.timeout());
        let response = self.transport.send(request).await?;
        if response.status == 404 {
            return Err(RagError::ModelUnavailable {
                requested: name.to_string(),
            });
        }
        if !response.is_success() {
            return Err(service_error("model details", response.status, &response.body));
        }
        let reply: ShowReply = response.json().map_err(|e| RagError::Generation {
            message: format!("unreadable model details: {e}"),
            attempts: Vec::new(),
        })?;

        let context_length = reply
            .model_info
            .iter()
            .find(|(key, _)| key.ends_with(".context_length"))
            .and_then(|(_, value)| value.as_u64());

        Ok(ModelDetails {
            name: name.to_string(),
            family: reply.details.family,
            parameter_size: reply.details.parameter_size,
            quantization_level: reply.details.quantization_level,
            context_length,
            parameters: reply.parameters,
            template: reply.template,
        })
    }

    /// The model to use for `requested` (or the default model).
    ///
    /// An unavailable model is replaced by the fallback when the service
    /// has it, else by the first model the service lists.
    pub async fn resolve_model(&self, requested: Option<&str>) -> Result<String> {
        let requested = requested.unwrap_or(&self.config.default_model);
        let models = self.list_models().await?;

        if models.iter().any(|m| same_model(&m.name, requested)) {
            return Ok(requested.to_string());
        }

        if let Some(fallback) = self.config.fallback_model.as_deref() {
            if models.iter().any(|m| same_model(&m.name, fallback)) {
                warn!("Model {requested} is not available; using fallback {fallback}");
                return Ok(fallback.to_string());
            }
        }

        match models.first() {
            Some(first) => {
                warn!("Model {requested} is not available; using {}", first.name);
                Ok(first.name.clone())
            }
            None => Err(RagError::ModelUnavailable {
                requested: requested.to_string(),
            }),
        }
    }

    fn generate_body(&self, model: &str, prompt: &str, stream: bool) -> Value {
        json!({
            "model": model,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            }
        })
    }

    /// Generate a completion, retrying transient failures.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<GenerationOutput> {
        let request = HttpRequest::post_json(self.url("/api/generate"), &self.generate_body(model, prompt, false))
            .with_timeout(self.config.timeout());

        let outcome = retry(
            &self.config.retry,
            "generation",
            AttemptError::is_transient,
            |_| self.generate_once(request.clone()),
        )
        .await;

        match outcome {
            Ok(record) => {
                let usage = record.usage();
                info!(
                    "Generated {} token(s) with {model} in {}ms",
                    usage.completion_tokens, usage.total_duration_ms
                );
                Ok(GenerationOutput {
                    text: record.response,
                    model: model.to_string(),
                    usage,
                })
            }
            Err(exhausted) => match exhausted.last {
                AttemptError::Transport(e @ (BridgeError::Connection { .. } | BridgeError::Cancelled)) => {
                    Err(RagError::Bridge(e))
                }
                last => Err(RagError::Generation {
                    message: last.to_string(),
                    attempts: exhausted.attempts,
                }),
            },
        }
    }

    async fn generate_once(&self, request: HttpRequest) -> std::result::Result<GenerateRecord, AttemptError> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(AttemptError::Transport)?;
        if !response.is_success() {
            return Err(AttemptError::Status {
                status: response.status,
                body: redact_for_log(&response.body, ERROR_BODY_CHARS),
            });
        }

        let record: GenerateRecord = response
            .json()
            .map_err(|e| AttemptError::Malformed(e.to_string()))?;
        if let Some(error) = record.error {
            return Err(AttemptError::Malformed(error));
        }
        if !record.done {
            return Err(AttemptError::Malformed("completion record missing".to_string()));
        }
        Ok(record)
    }

    /// Generate a completion as a stream, passing each text chunk to
    /// `on_chunk` in arrival order. Not retried: chunks may already have
    /// been delivered.
    pub async fn generate_streaming(
        &self,
        model: &str,
        prompt: &str,
        on_chunk: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let request = HttpRequest::post_json(self.url("/api/generate"), &self.generate_body(model, prompt, true))
            .with_timeout(self.config.stream_timeout());

        let mut state = StreamState::default();
        let status = {
            let mut on_line = |line: &str| state.feed(line, &mut *on_chunk);
            self.transport
                .send_streaming(request, &mut on_line, cancel)
                .await?
        };

        let failure = |message: String| RagError::Generation {
            attempts: vec![format!("attempt 1: {message}")],
            message,
        };

        if let Some(error) = state.error {
            return Err(failure(error));
        }
        if !(200..300).contains(&status) {
            let body = state.unparsed.unwrap_or_default();
            return Err(failure(format!("HTTP {status}: {body}")));
        }
        let Some(usage) = state.usage else {
            return Err(failure("stream ended without a completion record".to_string()));
        };

        info!(
            "Streamed {} token(s) with {model} in {}ms",
            usage.completion_tokens, usage.total_duration_ms
        );
        Ok(GenerationOutput {
            text: state.text,
            model: model.to_string(),
            usage,
        })
    }
}

/// Whether an installed model name satisfies a requested one. A request
/// without a tag matches the `latest` tag.
fn same_model(installed: &str, requested: &str) -> bool {
    installed == requested
        || (!requested.contains(':') && installed.strip_suffix(":latest") == Some(requested))
}

fn service_error(what: &str, status: u16, body: &str) -> RagError {
    RagError::Generation {
        message: format!("{what} request failed with HTTP {status}: {}", redact_for_log(body, ERROR_BODY_CHARS)),
        attempts: Vec::new(),
    }
}
