//! Retry policy: backoff curve, jitter range, and retry eligibility.

use crate::errors::FailureKind;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Uniform multiplier range applied to each computed delay.
///
/// The sampled factor spreads simultaneous retries apart so parallel stages
/// do not hammer an upstream in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JitterRange {
    /// Lower bound of the factor.
    pub low: f64,
    /// Upper bound of the factor.
    pub high: f64,
}

impl JitterRange {
    /// A degenerate range that leaves delays untouched. Useful in tests.
    pub const NONE: Self = Self { low: 1.0, high: 1.0 };

    /// Creates a jitter range, normalizing inverted or negative bounds.
    #[must_use]
    pub fn new(low: f64, high: f64) -> Self {
        let low = low.max(0.0);
        let high = high.max(0.0);
        if low > high {
            Self { low: high, high: low }
        } else {
            Self { low, high }
        }
    }

    /// Samples a factor from the range.
    #[must_use]
    pub fn sample(&self) -> f64 {
        if (self.high - self.low).abs() < f64::EPSILON {
            self.low
        } else {
            rand::thread_rng().gen_range(self.low..=self.high)
        }
    }
}

// Deserialization goes through `new` so a persisted range carries the same
// normalization as a constructed one.
impl<'de> Deserialize<'de> for JitterRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            low: f64,
            high: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::new(raw.low, raw.high))
    }
}

impl Default for JitterRange {
    fn default() -> Self {
        Self { low: 0.5, high: 1.5 }
    }
}

/// Configuration for retry behavior.
///
/// A policy is immutable and stateless; any number of concurrent retry
/// loops may share one by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied per retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor range.
    #[serde(default)]
    pub jitter: JitterRange,
    /// Failure kinds that re-enter the loop; everything else aborts.
    #[serde(default = "default_retryable_kinds")]
    pub retryable_kinds: HashSet<FailureKind>,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_kinds() -> HashSet<FailureKind> {
    [
        FailureKind::Network,
        FailureKind::Timeout,
        FailureKind::RateLimited,
    ]
    .into_iter()
    .collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: JitterRange::default(),
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter range.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the retryable kind set.
    #[must_use]
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Adds a kind to the retryable set.
    #[must_use]
    pub fn with_retry_on(mut self, kind: FailureKind) -> Self {
        self.retryable_kinds.insert(kind);
        self
    }

    /// Whether a failure of this kind is worth another attempt.
    #[must_use]
    pub fn should_retry(&self, kind: FailureKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    ///
    /// The exponential curve is capped at `max_delay_ms` before jitter is
    /// applied, so a jitter factor above 1.0 can exceed the cap by at most
    /// that factor.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let raw = (self.base_delay_ms as f64) * self.backoff_multiplier.powi(retry as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let jittered = capped * self.jitter.sample();
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30000);
        assert!(policy.should_retry(FailureKind::Network));
        assert!(policy.should_retry(FailureKind::Timeout));
        assert!(policy.should_retry(FailureKind::RateLimited));
        assert!(!policy.should_retry(FailureKind::Invariant));
        assert!(!policy.should_retry(FailureKind::Corruption));
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_base_delay_ms(500)
            .with_max_delay_ms(10000)
            .with_backoff_multiplier(3.0)
            .with_jitter(JitterRange::NONE)
            .with_retry_on(FailureKind::ResourceExhausted);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.backoff_multiplier, 3.0);
        assert!(policy.should_retry(FailureKind::ResourceExhausted));
        assert!(policy.should_retry(FailureKind::Network));
    }

    #[test]
    fn test_delay_exponential_no_jitter() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterRange::NONE);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterRange::NONE);

        // Would be 1000 * 2^10 without the cap
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_within_jitter_envelope() {
        let policy = RetryPolicy::new().with_base_delay_ms(1000);

        for retry in 0..4 {
            let deterministic = 1000.0 * 2.0f64.powi(retry);
            let capped = deterministic.min(30000.0);
            for _ in 0..20 {
                let delay = policy.delay_for_attempt(retry as usize).as_millis() as f64;
                assert!(delay >= capped * 0.5 - 1.0);
                assert!(delay <= capped * 1.5 + 1.0);
            }
        }
    }

    #[test]
    fn test_jitter_range_normalization() {
        let inverted = JitterRange::new(2.0, 0.5);
        assert_eq!(inverted.low, 0.5);
        assert_eq!(inverted.high, 2.0);

        let negative = JitterRange::new(-1.0, 1.0);
        assert_eq!(negative.low, 0.0);
    }

    #[test]
    fn test_deserialized_range_is_normalized() {
        let inverted: JitterRange = serde_json::from_str(r#"{"low": 1.5, "high": 0.5}"#).unwrap();
        assert_eq!(inverted.low, 0.5);
        assert_eq!(inverted.high, 1.5);

        let negative: JitterRange = serde_json::from_str(r#"{"low": -2.0, "high": 1.0}"#).unwrap();
        assert_eq!(negative.low, 0.0);
        assert_eq!(negative.high, 1.0);
    }

    #[test]
    fn test_inverted_jitter_config_still_delays_in_envelope() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"base_delay_ms": 1000, "jitter": {"low": 1.5, "high": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(policy.jitter.low, 0.5);
        assert_eq!(policy.jitter.high, 1.5);

        for _ in 0..20 {
            let delay = policy.delay_for_attempt(0).as_millis() as f64;
            assert!(delay >= 500.0 - 1.0);
            assert!(delay <= 1500.0 + 1.0);
        }
    }

    #[test]
    fn test_jitter_none_is_identity() {
        for _ in 0..10 {
            assert_eq!(JitterRange::NONE.sample(), 1.0);
        }
    }

    #[test]
    fn test_policy_deserializes_with_partial_fields() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 7}"#).unwrap();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay_ms, 1000);
        assert!(policy.should_retry(FailureKind::Network));
    }
}
