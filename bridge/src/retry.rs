//! Bounded retry with exponential backoff and random jitter.
//!
//! Shared by session establishment and by the generation client: both loops
//! give up after `max_attempts` and report every attempt's failure, not just
//! the last one.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backoff schedule for a bounded retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay_ms: u64,

    /// Upper bound for the exponential part of the delay.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Random jitter added to every delay, drawn from `0..jitter_ms`.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Set the jitter bound.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before the next try, given the 1-based number of the attempt
    /// that just failed. Excludes jitter.
    pub fn base_delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay before the next try, including random jitter.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.jitter_ms)
        };
        self.base_delay_for(failed_attempt) + Duration::from_millis(jitter)
    }
}

/// All attempts of a retry loop failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// One description per failed attempt, in order.
    pub attempts: Vec<String>,

    /// The error from the final attempt.
    pub last: E,
}

/// Run `op` until it succeeds, a non-retryable error occurs, or the policy's
/// attempts are used up.
///
/// A non-retryable error ends the loop immediately; it is still reported as
/// `RetryExhausted` with the attempts made so far.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{operation} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(e) => {
                attempts.push(format!("attempt {attempt}: {e}"));

                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(RetryExhausted { attempts, last: e });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "{operation} failed (attempt {attempt}/{max_attempts}): {e}; retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).with_jitter(Duration::ZERO);

        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(Duration::ZERO);

        assert_eq!(policy.base_delay_for(8), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100))
            .with_jitter(Duration::from_millis(50));

        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_collects_every_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).with_jitter(Duration::ZERO);

        let result: std::result::Result<(), RetryExhausted<String>> =
            retry(&policy, "op", |_| true, |n| async move { Err(format!("boom {n}")) }).await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts.len(), 3);
        assert_eq!(exhausted.last, "boom 3");
        assert!(exhausted.attempts[0].contains("boom 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: std::result::Result<(), RetryExhausted<String>> = retry(
            &policy,
            "op",
            |e: &String| e != "fatal",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
