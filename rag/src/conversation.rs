//! Per-caller conversation history on top of the [`StateStore`] port.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ragbridge_store::{StateStore, StateStoreExt, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConversationConfig;
use crate::error::Result;
use crate::metrics::TokenUsage;

/// One question and its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// The stored history of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,

    /// Identity that owns this conversation. Other callers cannot read it.
    pub caller: Option<String>,

    /// Oldest first.
    pub turns: Vec<ConversationTurn>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, caller: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            caller,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn has_history(&self) -> bool {
        !self.turns.is_empty()
    }

    /// Append a turn, dropping the oldest beyond `max_turns`.
    pub fn push_turn(&mut self, turn: ConversationTurn, usage: &TokenUsage, max_turns: usize) {
        self.updated_at = turn.timestamp;
        self.turns.push(turn);
        let excess = self.turns.len().saturating_sub(max_turns.max(1));
        self.turns.drain(..excess);
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
    }
}

enum Stored {
    Readable(ConversationSession),
    Unreadable,
}

/// Loads and saves [`ConversationSession`]s.
pub struct ConversationStore {
    state: Arc<dyn StateStore>,
    config: ConversationConfig,
    /// Serializes read-modify-write of sessions within this process.
    append_lock: Mutex<()>,
}

impl ConversationStore {
    pub fn new(state: Arc<dyn StateStore>, config: ConversationConfig) -> Self {
        Self {
            state,
            config,
            append_lock: Mutex::new(()),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.config.key_prefix)
    }

    /// The conversation `id` if it belongs to `caller`.
    ///
    /// A conversation owned by someone else is reported as missing.
    pub async fn load(&self, id: &str, caller: Option<&str>) -> Result<Option<ConversationSession>> {
        Ok(self.fetch(id).await?.and_then(|stored| match stored {
            Stored::Readable(session) if session.caller.as_deref() == caller => Some(session),
            Stored::Readable(_) => {
                warn!("Conversation {id} requested by a caller that does not own it");
                None
            }
            Stored::Unreadable => None,
        }))
    }

    /// The session a new turn should go to.
    ///
    /// Reuses `id` when the caller owns it or it is unused. Otherwise, or
    /// without an id, starts a conversation under a fresh id.
    pub async fn resolve(&self, id: Option<&str>, caller: Option<&str>) -> Result<ConversationSession> {
        let owner = caller.map(str::to_string);
        let Some(id) = id else {
            return Ok(ConversationSession::new(Uuid::new_v4().to_string(), owner));
        };

        match self.fetch(id).await? {
            None => Ok(ConversationSession::new(id, owner)),
            Some(Stored::Readable(session)) if session.caller.as_deref() == caller => Ok(session),
            Some(_) => {
                warn!("Conversation {id} is not available to this caller; starting a new one");
                Ok(ConversationSession::new(Uuid::new_v4().to_string(), owner))
            }
        }
    }

    async fn fetch(&self, id: &str) -> Result<Option<Stored>> {
        match self.state.get_json::<ConversationSession>(&self.key(id)).await {
            Ok(session) => Ok(session.map(Stored::Readable)),
            Err(StoreError::Serialization(e)) => {
                warn!("Conversation {id} is unreadable: {e}");
                Ok(Some(Stored::Unreadable))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, session: &ConversationSession) -> Result<()> {
        self.state.set_json(&self.key(&session.id), session).await?;
        debug!(
            "Saved conversation {} ({} turns)",
            session.id,
            session.turns.len()
        );
        Ok(())
    }

    /// Append a turn to the conversation and persist it.
    ///
    /// The turn goes onto the latest stored copy of the conversation, not
    /// onto `session`, so answers finishing concurrently all keep their
    /// turns. `session` is only used when nothing readable is stored for
    /// the same caller. Other processes sharing the state store can still
    /// race; the store only guarantees single-key atomicity.
    pub async fn append(
        &self,
        session: ConversationSession,
        turn: ConversationTurn,
        usage: &TokenUsage,
    ) -> Result<ConversationSession> {
        let _guard = self.append_lock.lock().await;
        let mut latest = match self.fetch(&session.id).await? {
            Some(Stored::Readable(stored)) if stored.caller == session.caller => stored,
            _ => session,
        };
        latest.push_turn(turn, usage, self.config.max_turns);
        self.save(&latest).await?;
        Ok(latest)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.state.delete(&self.key(id)).await?)
    }

    /// Delete conversations not updated within `max_age`, and entries that
    /// no longer decode. Returns how many were removed.
    pub async fn prune(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        for key in self.state.keys(&self.config.key_prefix).await? {
            let stale = match self.state.get_json::<ConversationSession>(&key).await {
                Ok(Some(session)) => session.updated_at < cutoff,
                Ok(None) => false,
                Err(e) => {
                    warn!("Removing unreadable conversation {key}: {e}");
                    true
                }
            };
            if stale && self.state.delete(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Pruned {removed} conversation(s)");
        }
        Ok(removed)
    }
}
