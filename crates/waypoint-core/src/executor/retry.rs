//! One retry policy, applied wherever retries happen: tool calls inside the
//! executor and rate-limited steps across turns.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, OperationError};

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Budget for waiting on a rate limit across turns
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_wait: Duration::from_millis(config.rate_limit_max_wait_ms),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^retries_used`, capped at `max_delay`.
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let shift = retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    /// Longest one item can take when every attempt runs to `deadline` and
    /// every retry waits its full backoff.
    pub fn execution_budget(&self, deadline: Duration) -> Duration {
        let retries = self.max_retries;
        let attempts = deadline.saturating_mul(retries.saturating_add(1));
        // Backoff stops growing after 20 doublings.
        let ramp = retries.min(21);
        let waits = (0..ramp)
            .map(|retry| self.backoff(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
            .saturating_add(self.backoff(20).saturating_mul(retries - ramp));
        attempts.saturating_add(waits)
    }

    /// Whether an error of this kind is worth another attempt.
    pub fn is_retryable(kind: ErrorKind, idempotent: bool) -> bool {
        match kind {
            ErrorKind::Transient | ErrorKind::Abandoned => true,
            ErrorKind::Timeout => idempotent,
            _ => false,
        }
    }

    /// Decides after attempt number `attempts` (1-based) failed with `error`.
    pub fn decide(&self, error: &OperationError, attempts: u32, idempotent: bool) -> RetryDecision {
        if !Self::is_retryable(error.kind, idempotent) {
            return RetryDecision::GiveUp;
        }
        let retries_used = attempts.saturating_sub(1);
        if retries_used >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            after: self.backoff(retries_used),
        }
    }

    /// Decides for a step that has been rate limited for `waited`.
    pub fn decide_wait(&self, waited: Duration, retry_after: Duration) -> RetryDecision {
        if waited >= self.max_wait {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry { after: retry_after }
        }
    }
}
