//! Request rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,

    /// Requests left in the current window after this one.
    pub remaining: u32,

    /// When denied, how long until a slot frees up.
    pub retry_after: Option<Duration>,
}

/// Checks a request against a per-identifier budget and, if allowed,
/// records it.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_register(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision>;
}

/// Sliding-window limiter held in memory.
#[derive(Clone, Default)]
pub struct MemoryRateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_register(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision> {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        let recent = hits.entry(identifier.to_string()).or_default();

        while recent
            .front()
            .is_some_and(|at| now.duration_since(*at) >= window)
        {
            recent.pop_front();
        }

        let used = u32::try_from(recent.len()).unwrap_or(u32::MAX);
        if used >= limit {
            let retry_after = recent
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(retry_after),
            });
        }

        recent.push_back(now);
        Ok(RateDecision {
            allowed: true,
            remaining: limit - used - 1,
            retry_after: None,
        })
    }
}
