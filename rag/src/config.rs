//! Configuration for the RAG pipeline.

use std::time::Duration;

use ragbridge_bridge::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub generation: GenerationConfig,

    pub prompt: PromptConfig,

    pub conversation: ConversationConfig,

    /// Limits applied by [`RagService`](crate::RagService).
    pub service: ServiceConfig,

    /// How long answers stay in the response cache.
    pub response_cache_ttl_secs: u64,

    /// How long the remote model list is cached.
    pub model_list_ttl_secs: u64,

    /// Documents retrieved per question when the caller does not say.
    pub default_limit: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            prompt: PromptConfig::default(),
            conversation: ConversationConfig::default(),
            service: ServiceConfig::default(),
            response_cache_ttl_secs: 3600,
            model_list_ttl_secs: 300,
            default_limit: 5,
        }
    }
}

impl RagConfig {
    pub fn with_generation(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    pub fn with_prompt(mut self, config: PromptConfig) -> Self {
        self.prompt = config;
        self
    }

    pub fn with_conversation(mut self, config: ConversationConfig) -> Self {
        self.conversation = config;
        self
    }

    pub fn with_service(mut self, config: ServiceConfig) -> Self {
        self.service = config;
        self
    }

    pub fn with_response_cache_ttl(mut self, ttl: Duration) -> Self {
        self.response_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_model_list_ttl(mut self, ttl: Duration) -> Self {
        self.model_list_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn response_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.response_cache_ttl_secs)
    }

    pub fn model_list_ttl(&self) -> Duration {
        Duration::from_secs(self.model_list_ttl_secs)
    }
}

/// Remote text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Inference service base URL as seen from the remote host.
    pub base_url: String,

    /// Model used when the caller does not pick one.
    pub default_model: String,

    /// Substitute for an unavailable model, if the service has it.
    pub fallback_model: Option<String>,

    pub temperature: f32,

    /// Upper bound on generated tokens.
    pub max_tokens: u32,

    /// Retry schedule for blocking generation.
    pub retry: RetryPolicy,

    /// Timeout for one blocking generation request.
    pub timeout_secs: u64,

    /// Timeout for a whole streamed generation.
    pub stream_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            default_model: "llama3.1:8b".to_string(),
            fallback_model: Some("llama3.2:3b".to_string()),
            temperature: 0.2,
            max_tokens: 1024,
            retry: RetryPolicy::default(),
            timeout_secs: 120,
            stream_timeout_secs: 600,
        }
    }
}

impl GenerationConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, model: Option<String>) -> Self {
        self.fallback_model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

/// Prompt assembly and context-window fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Fixed instructions at the top of every prompt.
    pub system_prompt: String,

    /// Per-document character budget in the context section.
    pub max_context_chars: usize,

    /// Prior turns included in the prompt.
    pub history_turns: usize,

    /// Literal that introduces the question. Context fitting never cuts
    /// at or after it.
    pub question_marker: String,

    /// Tokens kept free for the model's answer.
    pub reserved_response_tokens: usize,

    /// Slack for the token estimate.
    pub safety_margin_tokens: usize,

    /// Characters per token in the estimate.
    pub chars_per_token: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: concat!(
                "You are a research assistant answering questions about parliamentary records. ",
                "Answer only from the context below. If the context does not contain the answer, ",
                "say so. Cite sources by their bracketed number."
            )
            .to_string(),
            max_context_chars: 1500,
            history_turns: 3,
            question_marker: "Question:".to_string(),
            reserved_response_tokens: 1024,
            safety_margin_tokens: 256,
            chars_per_token: 4,
        }
    }
}

impl PromptConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.max_context_chars = chars;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn with_reserved_response_tokens(mut self, tokens: usize) -> Self {
        self.reserved_response_tokens = tokens;
        self
    }

    pub fn with_safety_margin_tokens(mut self, tokens: usize) -> Self {
        self.safety_margin_tokens = tokens;
        self
    }
}

/// Per-caller conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Turns kept per conversation; older ones are dropped.
    pub max_turns: usize,

    /// State store key prefix.
    pub key_prefix: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            key_prefix: "conversation:".to_string(),
        }
    }
}

impl ConversationConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

/// Limits for outward callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reject requests that carry no valid API key.
    pub require_api_key: bool,

    /// Requests per window for keys without their own limit.
    pub rate_limit: u32,

    pub rate_window_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            rate_limit: 60,
            rate_window_secs: 60,
        }
    }
}

impl ServiceConfig {
    pub fn with_require_api_key(mut self, required: bool) -> Self {
        self.require_api_key = required;
        self
    }

    pub fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_window_secs = window.as_secs();
        self
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}
