//! Embedding cache keyed by a content hash.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ragbridge_store::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::Embedding;

const KEY_PREFIX: &str = "emb:";

/// Embeddings stored in a shared [`Cache`] with a fixed TTL.
///
/// Keys are derived from the model and the text, so they cannot be
/// enumerated for bulk invalidation; entries only leave by expiry. Backend
/// failures degrade to cache misses.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EmbeddingCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Compute a hash for cache lookup.
    pub fn hash_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{KEY_PREFIX}{hex}")
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        match self.cache.get_json::<Embedding>(&key).await {
            Ok(Some(embedding)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(embedding)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!("Embedding cache read failed: {e}");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: &Embedding) {
        let key = Self::hash_key(text, model);
        match self.cache.set_json(&key, embedding, self.ttl, &[]).await {
            Ok(()) => debug!("Cached embedding (model: {model})"),
            Err(e) => warn!("Embedding cache write failed: {e}"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}
