//! Collaborator ports consumed by the RAG pipeline.
//!
//! Each port is an async trait so that deployments can plug in their own
//! backends. The in-memory implementations here are what the tests use;
//! the CLI keeps conversations in a [`FileStateStore`].

pub mod audit;
pub mod auth;
pub mod cache;
pub mod error;
pub mod file_state;
pub mod rate_limit;
pub mod state;

pub use audit::{AuditEntry, AuditLog, AuditOutcome, MemoryAuditLog, TracingAuditLog};
pub use auth::{ApiKeyInfo, ApiKeyValidator, StaticApiKeyValidator};
pub use cache::{Cache, CacheExt, MemoryCache};
pub use error::{Result, StoreError};
pub use file_state::FileStateStore;
pub use rate_limit::{MemoryRateLimiter, RateDecision, RateLimiter};
pub use state::{MemoryStateStore, StateStore, StateStoreExt};
