//! # RAG
//!
//! Answers questions from documents in a remote vector store, with text
//! generated by a remote inference service. Both services are reached
//! through an [`HttpTransport`](ragbridge_bridge::HttpTransport).
//!
//! ## Architecture
//!
//! ```text
//! RagService (auth, rate limit, audit)
//!      │
//!      ▼
//! GenerationOrchestrator
//!      ├── EmbeddingClient ──┐
//!      ├── VectorStoreClient ├──► HttpTransport ──► remote services
//!      ├── GenerationClient ─┘
//!      ├── ConversationStore ──► StateStore port
//!      └── response cache ─────► Cache port
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = GenerationOrchestrator::builder()
//!     .with_config(RagConfig::default())
//!     .with_transport(bridge.clone())
//!     .with_health_check(bridge)
//!     .build()?;
//!
//! let answer = orchestrator
//!     .answer("What was said about housing?", None, &AnswerOptions::default())
//!     .await?;
//! println!("{}", answer.answer);
//! ```

pub mod config;
pub mod context_window;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod service;

pub use config::{ConversationConfig, GenerationConfig, PromptConfig, RagConfig, ServiceConfig};
pub use context_window::{DEFAULT_CONTEXT_WINDOW, FittedPrompt, WindowBudget, context_window, estimate_tokens, fit_prompt};
pub use conversation::{ConversationSession, ConversationStore, ConversationTurn};
pub use error::{ErrorCode, ErrorResponse, RagError, Result};
pub use generation::{GenerationClient, GenerationOutput, ModelDetails, ModelInfo};
pub use metrics::{TokenUsage, UsageTotals, UsageTracker};
pub use orchestrator::{
    Answer, AnswerOptions, CacheCategory, GenerationOrchestrator, GenerationOrchestratorBuilder,
    RESPONSES_TAG, Source,
};
pub use service::RagService;
