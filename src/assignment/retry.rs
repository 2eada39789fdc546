//! Retry/backoff policy for agent-reported task failures (spec §4.5
//! "Failed(retryable=true) re-enqueues with attempt++ until max_attempts,
//! then Failed(final); Backoff: exponential with jitter, base
//! initial_backoff_ms, factor 2, cap max_backoff_ms").

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Visibility timeout to hand the queue broker when re-enqueuing.
    pub requeue_visibility: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            requeue_visibility: Duration::from_secs(300),
        }
    }
}

/// `min(initial * 2^(attempt-1), cap)`, then full jitter over `[0, cap]`.
/// `attempt` is 1-based (the attempt about to be retried).
pub fn backoff_with_jitter(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let exponential = config.initial_backoff_ms.saturating_mul(1u64 << exponent);
    let cap = exponential.min(config.max_backoff_ms);
    let jittered = if cap == 0 { 0 } else { rand::thread_rng().gen_range(0..=cap) };
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            requeue_visibility: Duration::from_secs(60),
        }
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let cfg = config();
        for attempt in 1..=10 {
            let delay = backoff_with_jitter(&cfg, attempt);
            assert!(delay.as_millis() as u64 <= cfg.max_backoff_ms);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_before_cap() {
        let cfg = config();
        let bound_for = |attempt: u32| cfg.initial_backoff_ms.saturating_mul(1u64 << (attempt - 1)).min(cfg.max_backoff_ms);
        assert_eq!(bound_for(1), 1_000);
        assert_eq!(bound_for(2), 2_000);
        assert_eq!(bound_for(3), 4_000);
        assert_eq!(bound_for(4), 8_000);
        assert_eq!(bound_for(5), 10_000, "capped at max_backoff_ms");
    }

    #[test]
    fn zero_initial_backoff_never_panics() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 1_000,
            requeue_visibility: Duration::from_secs(1),
        };
        assert_eq!(backoff_with_jitter(&cfg, 1), Duration::ZERO);
    }
}
