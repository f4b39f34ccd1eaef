//! Token usage accounting.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Usage reported for one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,

    /// Wall time of the whole request on the inference service.
    pub total_duration_ms: u64,

    /// Time spent producing completion tokens.
    pub generation_duration_ms: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn tokens_per_second(&self) -> f64 {
        tokens_per_second(self.completion_tokens, self.generation_duration_ms)
    }
}

/// Running totals across requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub generation_ms: u64,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &TokenUsage) {
        self.requests += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.generation_ms += usage.generation_duration_ms;
    }

    pub fn tokens_per_second(&self) -> f64 {
        tokens_per_second(self.completion_tokens, self.generation_ms)
    }
}

fn tokens_per_second(tokens: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        0.0
    } else {
        tokens as f64 * 1000.0 / duration_ms as f64
    }
}

/// Thread-safe [`UsageTotals`].
#[derive(Debug, Default)]
pub struct UsageTracker {
    totals: Mutex<UsageTotals>,
}

impl UsageTracker {
    pub fn record(&self, usage: &TokenUsage) {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(usage);
    }

    pub fn snapshot(&self) -> UsageTotals {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_totals_accumulate() {
        let tracker = UsageTracker::default();
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_duration_ms: 3000,
            generation_duration_ms: 2000,
        };
        tracker.record(&usage);
        tracker.record(&usage);

        let totals = tracker.snapshot();
        assert_eq!(totals.requests, 2);
        assert_eq!(totals.completion_tokens, 100);
        assert_eq!(totals.tokens_per_second(), 25.0);
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn test_zero_duration_rate() {
        assert_eq!(TokenUsage::default().tokens_per_second(), 0.0);
    }
}
