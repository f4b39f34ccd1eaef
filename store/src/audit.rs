//! Request/response audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Answered,
    CacheHit,
    Rejected,
    Failed,
}

/// One audited request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: String,

    /// Key id or other caller identifier.
    pub caller: String,

    pub outcome: AuditOutcome,

    /// Stable error code for rejected or failed requests.
    pub error_code: Option<String>,

    pub model: Option<String>,

    pub conversation_id: Option<String>,

    /// Question length in characters; the text itself is not logged.
    pub question_chars: usize,

    pub source_count: usize,

    pub duration_ms: u64,

    pub timestamp: DateTime<Utc>,
}

/// Sink for audit entries. Recording never fails the request.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry);
}

/// Emits each entry as a structured `tracing` event on the
/// `ragbridge::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: &AuditEntry) {
        info!(
            target: "ragbridge::audit",
            request_id = %entry.request_id,
            caller = %entry.caller,
            outcome = ?entry.outcome,
            error_code = entry.error_code.as_deref().unwrap_or(""),
            model = entry.model.as_deref().unwrap_or(""),
            conversation_id = entry.conversation_id.as_deref().unwrap_or(""),
            question_chars = entry.question_chars,
            source_count = entry.source_count,
            duration_ms = entry.duration_ms,
            "request audited"
        );
    }
}

/// Keeps entries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) {
        self.entries.lock().await.push(entry.clone());
    }
}
