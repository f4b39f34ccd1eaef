//! The retrieval-augmented generation pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ragbridge_bridge::{
    CancellationToken, ComponentHealth, HealthCheck, HealthProbe, HealthReport, HttpRequest,
    HttpTransport,
};
use ragbridge_embeddings::{EmbeddingClient, EmbeddingConfig};
use ragbridge_store::{Cache, CacheExt, MemoryCache, MemoryStateStore, StateStore};
use ragbridge_vector_store::{SearchFilter, SearchResult, VectorStoreClient, VectorStoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::context_window::{FittedPrompt, WindowBudget, context_window, fit_prompt};
use crate::conversation::{ConversationSession, ConversationStore, ConversationTurn};
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, GenerationOutput, ModelDetails, ModelInfo};
use crate::metrics::{TokenUsage, UsageTotals, UsageTracker};
use crate::prompt::{build_prompt, format_context, truncate_chars};

/// Tag carried by every cached answer.
pub const RESPONSES_TAG: &str = "responses";
const RESPONSE_PREFIX: &str = "rag:response:";
const EXCERPT_CHARS: usize = 240;

/// Per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOptions {
    /// Conversation to continue.
    pub conversation_id: Option<String>,

    /// Model to use instead of the configured default.
    pub model: Option<String>,

    /// Documents to retrieve.
    pub limit: Option<usize>,

    /// Allow the response cache. It is still skipped when the conversation
    /// has history.
    pub use_cache: bool,

    /// Put recent turns into the prompt.
    pub include_history: bool,

    /// Identity that owns the conversation.
    pub caller: Option<String>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            model: None,
            limit: None,
            use_cache: true,
            include_history: true,
            caller: None,
        }
    }
}

impl AnswerOptions {
    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// A document an answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Option<String>,
    pub fields: BTreeMap<String, Value>,
    pub certainty: Option<f64>,
    pub distance: Option<f64>,
    pub excerpt: String,
}

impl From<&SearchResult> for Source {
    fn from(result: &SearchResult) -> Self {
        Self {
            id: result.id.clone(),
            fields: result.fields.clone(),
            certainty: result.certainty,
            distance: result.distance,
            excerpt: truncate_chars(result.content.trim(), EXCERPT_CHARS),
        }
    }
}

/// The answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub model: String,
    pub conversation_id: String,
    pub usage: TokenUsage,
    pub timing_ms: u64,
    pub cache_hit: bool,
}

/// What the response cache keeps. Holds no conversation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    answer: String,
    sources: Vec<Source>,
    model: String,
    usage: TokenUsage,
    timing_ms: u64,
}

/// Groups of cached data that can be dropped on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    Existence,
    Members,
    Stats,
    Responses,
    All,
}

/// Everything up to generation.
struct Prepared {
    started: Instant,
    model: String,
    session: ConversationSession,
    cache_key: Option<String>,
    sources: Vec<Source>,
    prompt: FittedPrompt,
}

enum Prepare {
    Cached(Answer),
    Ready(Prepared),
}

/// Answers questions from retrieved documents.
///
/// Components share one [`HttpTransport`]; with the remote bridge as
/// transport, every remote call is serialized on its session.
pub struct GenerationOrchestrator {
    config: RagConfig,
    embeddings: EmbeddingClient,
    vector_store: VectorStoreClient,
    generation: GenerationClient,
    conversations: ConversationStore,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn HttpTransport>,
    health: Option<Arc<dyn HealthCheck>>,
    usage: UsageTracker,
}

impl GenerationOrchestrator {
    pub fn builder() -> GenerationOrchestratorBuilder {
        GenerationOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &EmbeddingClient {
        &self.embeddings
    }

    pub fn vector_store(&self) -> &VectorStoreClient {
        &self.vector_store
    }

    pub fn generation(&self) -> &GenerationClient {
        &self.generation
    }

    /// Answer `question` with a blocking generation.
    pub async fn answer(
        &self,
        question: &str,
        filter: Option<&SearchFilter>,
        options: &AnswerOptions,
    ) -> Result<Answer> {
        let prepared = match self.prepare(question, filter, options).await? {
            Prepare::Cached(answer) => return Ok(answer),
            Prepare::Ready(prepared) => prepared,
        };

        let output = self
            .generation
            .generate(&prepared.model, &prepared.prompt.prompt)
            .await?;
        Ok(self.finish(question, prepared, output, true).await)
    }

    /// Answer `question`, passing generated text to `on_chunk` as it
    /// arrives. A cached answer is delivered as a single chunk.
    ///
    /// Cancelling `cancel` aborts the generation; nothing is recorded.
    pub async fn answer_streaming(
        &self,
        question: &str,
        filter: Option<&SearchFilter>,
        options: &AnswerOptions,
        on_chunk: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let prepared = match self.prepare(question, filter, options).await? {
            Prepare::Cached(answer) => {
                on_chunk(&answer.answer);
                return Ok(answer);
            }
            Prepare::Ready(prepared) => prepared,
        };

        let output = self
            .generation
            .generate_streaming(&prepared.model, &prepared.prompt.prompt, on_chunk, cancel)
            .await?;
        Ok(self.finish(question, prepared, output, false).await)
    }

    async fn prepare(
        &self,
        question: &str,
        filter: Option<&SearchFilter>,
        options: &AnswerOptions,
    ) -> Result<Prepare> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation("question is empty".to_string()));
        }
        if let Some(filter) = filter {
            filter.to_graphql()?;
        }

        let caller = options.caller.as_deref();
        let session = self
            .conversations
            .resolve(options.conversation_id.as_deref(), caller)
            .await?;
        let cacheable = options.use_cache && !session.has_history();

        let model = self.generation.resolve_model(options.model.as_deref()).await?;
        if session.has_history() {
            debug!("Conversation {} has history; response cache skipped", session.id);
        }
        let cache_key = if cacheable {
            Some(response_key(question, filter, &model)?)
        } else {
            None
        };

        if let Some(key) = cache_key.as_deref() {
            if let Some(answer) = self.cached_answer(key, question, started, caller).await {
                return Ok(Prepare::Cached(answer));
            }
        }

        let limit = options.limit.unwrap_or(self.config.default_limit);
        let vector = self.embeddings.embed(question).await?;
        let results = self.vector_store.search(&vector, limit, filter).await?;
        debug!("Retrieved {} document(s)", results.len());

        let prompt_config = &self.config.prompt;
        let context = format_context(&results, prompt_config.max_context_chars);
        let history: &[ConversationTurn] = if options.include_history {
            session.turns.as_slice()
        } else {
            &[]
        };
        let prompt = build_prompt(prompt_config, &context, history, question);
        let budget = WindowBudget {
            window: context_window(&model),
            reserved: prompt_config.reserved_response_tokens,
            margin: prompt_config.safety_margin_tokens,
            chars_per_token: prompt_config.chars_per_token,
        };
        let prompt = fit_prompt(&prompt, question, &prompt_config.question_marker, budget);
        if prompt.truncated {
            info!(
                "Prompt truncated to ~{} tokens for {model} (budget {})",
                prompt.estimated_tokens, prompt.budget
            );
        }

        Ok(Prepare::Ready(Prepared {
            started,
            model,
            session,
            cache_key,
            sources: results.iter().map(Source::from).collect(),
            prompt,
        }))
    }

    async fn cached_answer(
        &self,
        key: &str,
        question: &str,
        started: Instant,
        caller: Option<&str>,
    ) -> Option<Answer> {
        let cached = match self.cache.get_json::<CachedResponse>(key).await {
            Ok(cached) => cached?,
            Err(e) => {
                warn!("Response cache read failed: {e}");
                return None;
            }
        };

        // A hit never continues an existing conversation.
        let session = ConversationSession::new(Uuid::new_v4().to_string(), caller.map(str::to_string));
        let conversation_id = session.id.clone();
        let turn = ConversationTurn {
            question: question.to_string(),
            answer: cached.answer.clone(),
            model: cached.model.clone(),
            timestamp: Utc::now(),
        };
        self.record_turn(session, turn, &cached.usage).await;

        let timing_ms = elapsed_ms(started);
        info!("Answered from cache in {timing_ms}ms");
        Some(Answer {
            answer: cached.answer,
            sources: cached.sources,
            model: cached.model,
            conversation_id,
            usage: cached.usage,
            timing_ms,
            cache_hit: true,
        })
    }

    async fn finish(
        &self,
        question: &str,
        prepared: Prepared,
        output: GenerationOutput,
        write_cache: bool,
    ) -> Answer {
        self.usage.record(&output.usage);

        let conversation_id = prepared.session.id.clone();
        let turn = ConversationTurn {
            question: question.trim().to_string(),
            answer: output.text.clone(),
            model: output.model.clone(),
            timestamp: Utc::now(),
        };
        self.record_turn(prepared.session, turn, &output.usage).await;

        let timing_ms = elapsed_ms(prepared.started);
        if write_cache {
            if let Some(key) = prepared.cache_key.as_deref() {
                let cached = CachedResponse {
                    answer: output.text.clone(),
                    sources: prepared.sources.clone(),
                    model: output.model.clone(),
                    usage: output.usage.clone(),
                    timing_ms,
                };
                if let Err(e) = self
                    .cache
                    .set_json(key, &cached, self.config.response_cache_ttl(), &[RESPONSES_TAG])
                    .await
                {
                    warn!("Response cache write failed: {e}");
                }
            }
        }

        info!(
            "Answered in {timing_ms}ms with {} ({} source(s))",
            output.model,
            prepared.sources.len()
        );
        Answer {
            answer: output.text,
            sources: prepared.sources,
            model: output.model,
            conversation_id,
            usage: output.usage,
            timing_ms,
            cache_hit: false,
        }
    }

    async fn record_turn(&self, session: ConversationSession, turn: ConversationTurn, usage: &TokenUsage) {
        let id = session.id.clone();
        if let Err(e) = self.conversations.append(session, turn, usage).await {
            warn!("Could not save conversation {id}: {e}");
        }
    }

    /// Status of the bridge, the inference service and the vector store.
    pub async fn health(&self) -> HealthReport {
        let probes = [
            HealthProbe::new(
                "inference",
                format!("{}/api/tags", self.config.generation.base_url.trim_end_matches('/')),
            ),
            HealthProbe::new(
                "vector_store",
                format!(
                    "{}/v1/.well-known/ready",
                    self.vector_store.config().base_url.trim_end_matches('/')
                ),
            ),
        ];

        match &self.health {
            Some(health) => health.check_health(&probes).await,
            None => self.probe_with_transport(&probes).await,
        }
    }

    async fn probe_with_transport(&self, probes: &[HealthProbe]) -> HealthReport {
        let mut components = Vec::with_capacity(probes.len());
        for probe in probes {
            let started = Instant::now();
            let request = HttpRequest::get(probe.url.clone()).with_timeout(Duration::from_secs(10));
            let result = self.transport.send(request).await;
            let latency = elapsed_ms(started);
            components.push(match result {
                Ok(response) if response.is_success() => {
                    ComponentHealth::ok(probe.name.clone(), "reachable", latency)
                }
                Ok(response) => ComponentHealth::error(
                    probe.name.clone(),
                    format!("HTTP {}", response.status),
                    Some(latency),
                ),
                Err(e) => ComponentHealth::error(probe.name.clone(), e.to_string(), Some(latency)),
            });
        }
        HealthReport::from_components(components)
    }

    /// Drop one category of cached data.
    pub async fn invalidate(&self, category: CacheCategory) -> Result<()> {
        match category {
            CacheCategory::Existence => self.vector_store.invalidate_existence().await?,
            CacheCategory::Members => self.vector_store.invalidate_members().await?,
            CacheCategory::Stats => {
                self.vector_store.invalidate_all_stats().await?;
            }
            CacheCategory::Responses => {
                let removed = self.cache.invalidate_tag(RESPONSES_TAG).await?;
                info!("Dropped {removed} cached response(s)");
            }
            CacheCategory::All => {
                self.vector_store.invalidate_existence().await?;
                self.vector_store.invalidate_members().await?;
                self.vector_store.invalidate_all_stats().await?;
                self.cache.invalidate_tag(RESPONSES_TAG).await?;
                self.generation.invalidate_models().await?;
            }
        }
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.generation.list_models().await
    }

    pub async fn model_details(&self, name: &str) -> Result<ModelDetails> {
        self.generation.model_details(name).await
    }

    /// The caller's conversation `id`, if it exists.
    pub async fn conversation(&self, id: &str, caller: Option<&str>) -> Result<Option<ConversationSession>> {
        self.conversations.load(id, caller).await
    }

    /// Delete conversations idle for longer than `max_age`.
    pub async fn prune_conversations(&self, max_age: Duration) -> Result<usize> {
        self.conversations.prune(max_age).await
    }

    pub fn usage_totals(&self) -> UsageTotals {
        self.usage.snapshot()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[derive(Serialize)]
struct ResponseKey<'a> {
    question: &'a str,
    filter: Option<&'a SearchFilter>,
    model: &'a str,
}

/// Cache key for an answer: a hash of question, filter and model.
fn response_key(question: &str, filter: Option<&SearchFilter>, model: &str) -> Result<String> {
    let encoded = serde_json::to_vec(&ResponseKey {
        question,
        filter,
        model,
    })?;
    let digest = Sha256::digest(&encoded);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("{RESPONSE_PREFIX}{hex}"))
}

/// Builder for [`GenerationOrchestrator`].
pub struct GenerationOrchestratorBuilder {
    config: RagConfig,
    embedding: EmbeddingConfig,
    vector_store: VectorStoreConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    cache: Option<Arc<dyn Cache>>,
    state: Option<Arc<dyn StateStore>>,
    health: Option<Arc<dyn HealthCheck>>,
}

impl GenerationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: RagConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            transport: None,
            cache: None,
            state: None,
            health: None,
        }
    }

    pub fn with_config(mut self, config: RagConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_embedding_config(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    pub fn with_vector_store_config(mut self, config: VectorStoreConfig) -> Self {
        self.vector_store = config;
        self
    }

    /// Transport for every remote call. Required.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Cache shared by embeddings, search results and answers. Defaults
    /// to an in-memory cache.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Conversation storage. Defaults to a bounded in-memory store.
    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Health source, normally the bridge. Without one, health probes go
    /// straight through the transport.
    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<GenerationOrchestrator> {
        let transport = self
            .transport
            .ok_or_else(|| RagError::Validation("an HTTP transport is required".to_string()))?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::default()));
        let state = self
            .state
            .unwrap_or_else(|| Arc::new(MemoryStateStore::default()));

        let embeddings = EmbeddingClient::new(self.embedding, transport.clone(), cache.clone());
        let vector_store = VectorStoreClient::new(self.vector_store, transport.clone(), cache.clone());
        let generation = GenerationClient::new(
            self.config.generation.clone(),
            transport.clone(),
            cache.clone(),
            self.config.model_list_ttl(),
        );
        let conversations = ConversationStore::new(state, self.config.conversation.clone());

        Ok(GenerationOrchestrator {
            config: self.config,
            embeddings,
            vector_store,
            generation,
            conversations,
            cache,
            transport,
            health: self.health,
            usage: UsageTracker::default(),
        })
    }
}

impl Default for GenerationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
