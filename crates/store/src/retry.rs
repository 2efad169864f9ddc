//! Backoff policy for transient metadata conflicts.

use crate::error::{StoreError, StoreResult};
use rand::Rng;
use std::time::Duration;
use strata_core::config::PublishConfig;
use tracing::warn;

/// Exponential backoff with jitter.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)`, capped at `max_delay`,
/// plus a uniform jitter in `0..=jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PublishConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff(attempt) + jitter
    }

    /// Decide what follows failed attempt `attempt` (1-based): the delay
    /// before the next attempt, or the error to surface to the caller.
    pub fn after_failure(
        &self,
        operation: &str,
        attempt: u32,
        err: StoreError,
    ) -> StoreResult<Duration> {
        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= self.max_attempts {
            return Err(StoreError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }
        let delay = self.delay_for(attempt);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient conflict, retrying"
        );
        Ok(delay)
    }
}
