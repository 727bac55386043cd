//! Requeue policy for requests handed back by a failed connection.
//!
//! # Responsibilities
//! - Decide whether an unsent request may go to a fresh connection
//! - Space attempts with exponential backoff plus jitter
//!
//! # Design Decisions
//! - Only requests that never reached the wire are ever offered here;
//!   partially sent requests fail unconditionally upstream
//! - Non-idempotent requests are not requeued unless configured
//! - Jitter (0-10% of the delay) keeps reconnect storms apart

use std::time::Duration;

use rand::Rng;

use crate::config::schema::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redispatch after this delay.
    Retry(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    max_attempts: u32,
    retry_non_idempotent: bool,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            retry_non_idempotent: config.retry_non_idempotent,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// `attempt` counts from 1 for the first requeue.
    pub fn decide(&self, attempt: u32, idempotent: bool) -> RetryDecision {
        if !self.enabled || attempt > self.max_attempts {
            return RetryDecision::GiveUp;
        }
        if !idempotent && !self.retry_non_idempotent {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff(attempt))
    }

    /// Exponential delay for `attempt`, capped, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_delay_ms.saturating_mul(exponential).min(self.max_delay_ms);

        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
