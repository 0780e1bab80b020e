//! Backoff and jitter for transient provider failures.
//!
//! Delays grow as `base * 2^retry`, capped at `max_delay_ms`. With jitter on,
//! each delay is drawn uniformly from `0..=delay`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Randomize each delay over `0..=delay`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Creates the default config: three attempts, one second base, jitter on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Uses the exact exponential delays.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// The un-jittered delay before retry number `retry + 1`.
    #[must_use]
    pub fn delay_ms(&self, retry: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_delay_ms)
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
pub struct Backoff {
    /// Retries already taken.
    pub attempt: u32,
}

impl Backoff {
    /// Creates fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delay before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Option<Duration> {
        if self.attempt + 1 >= config.max_attempts {
            return None;
        }
        let delay = self.current_delay(config);
        self.attempt += 1;
        Some(delay)
    }

    /// The delay for the current retry, jittered if the config asks for it.
    #[must_use]
    pub fn current_delay(&self, config: &RetryConfig) -> Duration {
        let delay = config.delay_ms(self.attempt);
        let millis = if config.jitter && delay > 0 {
            rand::thread_rng().gen_range(0..=delay)
        } else {
            delay
        };
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exact() -> RetryConfig {
        RetryConfig::new().with_base_delay_ms(100).without_jitter()
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!(config.jitter);
    }

    #[test]
    fn test_retry_config_from_partial_json() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "jitter": false}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert!(!config.jitter);
    }

    #[test]
    fn test_delays_double() {
        let config = exact();
        let mut backoff = Backoff::new();

        assert_eq!(backoff.current_delay(&config), Duration::from_millis(100));
        backoff.attempt = 2;
        assert_eq!(backoff.current_delay(&config), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = exact().with_max_delay_ms(500);
        let backoff = Backoff { attempt: 10 };

        assert_eq!(backoff.current_delay(&config), Duration::from_millis(500));
        assert_eq!(config.delay_ms(u32::MAX), 500);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        let backoff = Backoff::new();

        for _ in 0..50 {
            assert!(backoff.current_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_next_delay_respects_budget() {
        let config = exact().with_max_attempts(3);
        let mut backoff = Backoff::new();

        assert_eq!(backoff.next_delay(&config), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(&config), Some(Duration::from_millis(200)));
        assert!(backoff.next_delay(&config).is_none());
        assert_eq!(backoff.attempt, 2);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut backoff = Backoff::new();
        assert!(backoff.next_delay(&RetryConfig::none()).is_none());
    }
}
