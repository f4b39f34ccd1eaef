//! Durable key-value state (sessions, conversations).

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

/// Key-value state store with atomic single-key operations.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Typed access on top of [`StateStore`].
#[async_trait]
pub trait StateStoreExt {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()>;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStoreExt for S {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?).await
    }
}

struct StateEntry {
    value: Value,
    stored_at: Instant,
}

/// Bounded in-memory [`StateStore`].
///
/// Holds at most `capacity` keys, evicting the least recently used, and
/// optionally expires entries `ttl` after they were last written.
#[derive(Clone)]
pub struct MemoryStateStore {
    entries: Arc<Mutex<LruCache<String, StateEntry>>>,
    ttl: Option<Duration>,
}

impl MemoryStateStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl: None,
        }
    }

    /// Expire entries this long after their last write.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn is_expired(&self, entry: &StateEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(entry.stored_at) >= ttl)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !self.is_expired(entry, now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        debug!("State entry {key} expired");
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(
            key.to_string(),
            StateEntry {
                value,
                stored_at: Instant::now(),
            },
        ) {
            if evicted != key {
                debug!("State store full; evicted {evicted}");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
