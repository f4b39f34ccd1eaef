//! API-key validation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// What a valid key grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    /// Stable identifier used for rate limiting and audit, never the key.
    pub key_id: String,

    pub owner: String,

    /// Requests per rate-limit window; `None` uses the service default.
    pub rate_limit: Option<u32>,
}

/// Resolves presented API keys.
#[async_trait]
pub trait ApiKeyValidator: Send + Sync {
    /// `Ok(None)` means the key is unknown or revoked.
    async fn validate(&self, api_key: &str) -> Result<Option<ApiKeyInfo>>;
}

/// Validator over a fixed set of keys, stored as SHA-256 digests.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeyValidator {
    keys: HashMap<String, ApiKeyInfo>,
}

impl StaticApiKeyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, api_key: &str, info: ApiKeyInfo) -> Self {
        self.keys.insert(digest(api_key), info);
        self
    }

    /// Register a key by its hex SHA-256 digest.
    pub fn with_digest(mut self, digest: impl Into<String>, info: ApiKeyInfo) -> Self {
        self.keys.insert(digest.into().to_lowercase(), info);
        self
    }
}

fn digest(api_key: &str) -> String {
    let hash = Sha256::digest(api_key.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl ApiKeyValidator for StaticApiKeyValidator {
    async fn validate(&self, api_key: &str) -> Result<Option<ApiKeyInfo>> {
        if api_key.is_empty() {
            return Ok(None);
        }
        Ok(self.keys.get(&digest(api_key)).cloned())
    }
}
