//! Outward-facing facade: authentication, rate limiting, audit.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ragbridge_bridge::{CancellationToken, HealthReport};
use ragbridge_store::{
    ApiKeyValidator, AuditEntry, AuditLog, AuditOutcome, MemoryRateLimiter, RateLimiter,
    TracingAuditLog,
};
use ragbridge_vector_store::SearchFilter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{ErrorResponse, RagError, Result};
use crate::orchestrator::{Answer, AnswerOptions, GenerationOrchestrator};

const ANONYMOUS: &str = "anonymous";

struct Caller {
    id: String,
    limit: u32,
}

/// Serves questions to outward callers.
///
/// Every request is checked against the API-key validator and the rate
/// limiter before it reaches the pipeline, and audited afterwards. Failures
/// come back as [`ErrorResponse`]s.
pub struct RagService {
    orchestrator: Arc<GenerationOrchestrator>,
    validator: Arc<dyn ApiKeyValidator>,
    limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditLog>,
    config: ServiceConfig,
}

impl RagService {
    pub fn new(orchestrator: Arc<GenerationOrchestrator>, validator: Arc<dyn ApiKeyValidator>) -> Self {
        let config = orchestrator.config().service.clone();
        Self {
            orchestrator,
            validator,
            limiter: Arc::new(MemoryRateLimiter::default()),
            audit: Arc::new(TracingAuditLog),
            config,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn orchestrator(&self) -> &GenerationOrchestrator {
        &self.orchestrator
    }

    pub async fn answer(
        &self,
        api_key: Option<&str>,
        question: &str,
        filter: Option<&SearchFilter>,
        options: AnswerOptions,
    ) -> std::result::Result<Answer, ErrorResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let caller = match self.admit(api_key).await {
            Ok(caller) => caller,
            Err(e) => return Err(self.reject(&request_id, api_key, question, started, &e).await),
        };
        let options = AnswerOptions {
            caller: Some(caller.id.clone()),
            ..options
        };

        let result = self.orchestrator.answer(question, filter, &options).await;
        self.complete(&request_id, &caller.id, question, started, result)
            .await
    }

    pub async fn answer_streaming(
        &self,
        api_key: Option<&str>,
        question: &str,
        filter: Option<&SearchFilter>,
        options: AnswerOptions,
        on_chunk: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> std::result::Result<Answer, ErrorResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let caller = match self.admit(api_key).await {
            Ok(caller) => caller,
            Err(e) => return Err(self.reject(&request_id, api_key, question, started, &e).await),
        };
        let options = AnswerOptions {
            caller: Some(caller.id.clone()),
            ..options
        };

        let result = self
            .orchestrator
            .answer_streaming(question, filter, &options, on_chunk, cancel)
            .await;
        self.complete(&request_id, &caller.id, question, started, result)
            .await
    }

    pub async fn health(&self) -> HealthReport {
        self.orchestrator.health().await
    }

    async fn admit(&self, api_key: Option<&str>) -> Result<Caller> {
        let caller = match api_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => match self.validator.validate(key).await? {
                Some(info) => Caller {
                    id: info.key_id,
                    limit: info.rate_limit.unwrap_or(self.config.rate_limit),
                },
                None => return Err(RagError::Unauthorized),
            },
            None if self.config.require_api_key => return Err(RagError::Unauthorized),
            None => Caller {
                id: ANONYMOUS.to_string(),
                limit: self.config.rate_limit,
            },
        };

        let decision = self
            .limiter
            .check_and_register(&caller.id, caller.limit, self.config.rate_window())
            .await?;
        if !decision.allowed {
            let retry_after_secs = decision
                .retry_after
                .map_or(self.config.rate_window_secs, |d| d.as_secs_f64().ceil() as u64)
                .max(1);
            return Err(RagError::RateLimited { retry_after_secs });
        }
        debug!("Admitted {} ({} left in window)", caller.id, decision.remaining);
        Ok(caller)
    }

    async fn reject(
        &self,
        request_id: &str,
        api_key: Option<&str>,
        question: &str,
        started: Instant,
        error: &RagError,
    ) -> ErrorResponse {
        let response = error.to_response();
        warn!("Request {request_id} rejected: {}", response.code);
        let caller = if api_key.is_some() { "unverified" } else { ANONYMOUS };
        self.audit
            .record(&AuditEntry {
                request_id: request_id.to_string(),
                caller: caller.to_string(),
                outcome: AuditOutcome::Rejected,
                error_code: Some(response.code.to_string()),
                model: None,
                conversation_id: None,
                question_chars: question.chars().count(),
                source_count: 0,
                duration_ms: elapsed_ms(started),
                timestamp: Utc::now(),
            })
            .await;
        response
    }

    async fn complete(
        &self,
        request_id: &str,
        caller: &str,
        question: &str,
        started: Instant,
        result: Result<Answer>,
    ) -> std::result::Result<Answer, ErrorResponse> {
        let mut entry = AuditEntry {
            request_id: request_id.to_string(),
            caller: caller.to_string(),
            outcome: AuditOutcome::Answered,
            error_code: None,
            model: None,
            conversation_id: None,
            question_chars: question.chars().count(),
            source_count: 0,
            duration_ms: elapsed_ms(started),
            timestamp: Utc::now(),
        };

        let outcome = match result {
            Ok(answer) => {
                if answer.cache_hit {
                    entry.outcome = AuditOutcome::CacheHit;
                }
                entry.model = Some(answer.model.clone());
                entry.conversation_id = Some(answer.conversation_id.clone());
                entry.source_count = answer.sources.len();
                Ok(answer)
            }
            Err(e) => {
                warn!("Request {request_id} failed: {e}");
                let response = e.to_response();
                entry.outcome = AuditOutcome::Failed;
                entry.error_code = Some(response.code.to_string());
                Err(response)
            }
        };

        self.audit.record(&entry).await;
        outcome
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
