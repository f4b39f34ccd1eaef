//! Expiring key-value cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

/// A cache with per-entry TTL and optional tag-scoped invalidation.
///
/// Only single-key operations are atomic.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key` for `ttl`, associated with `tags`.
    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[&str]) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry carrying `tag`. Backends without tag support
    /// remove nothing.
    async fn invalidate_tag(&self, _tag: &str) -> Result<usize> {
        Ok(0)
    }
}

/// Typed access on top of [`Cache`].
#[async_trait]
pub trait CacheExt {
    /// Fetch and decode an entry. Entries that no longer decode are treated
    /// as missing.
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Encode and store an entry.
    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<()>;
}

#[async_trait]
impl<C: Cache + ?Sized> CacheExt for C {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                debug!("Ignoring undecodable cache entry {key}: {e}");
                Ok(None)
            }
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl, tags).await
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    expires_at: Instant,
    tags: Vec<String>,
}

/// In-process [`Cache`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_entries: usize,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` live entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[&str]) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
                tags: tags.iter().map(ToString::to_string).collect(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.tags.iter().any(|t| t == tag));
        let removed = before - entries.len();
        debug!("Invalidated {removed} cache entries tagged {tag}");
        Ok(removed)
    }
}
