//! Per-action token buckets.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Classic token bucket: `capacity` tokens, refilled continuously at
/// `refill_per_sec`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or reports how long until one is available.
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(Duration::MAX))
    }
}

struct Limit {
    bucket: Mutex<TokenBucket>,
    max_wait: Duration,
}

/// Buckets for every configured action. Actions without a bucket are
/// unlimited.
#[derive(Default)]
pub struct RateLimiter {
    limits: HashMap<String, Limit>,
}

impl RateLimiter {
    pub fn new<'a, I>(configs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a RateLimitConfig)>,
    {
        let limits = configs
            .into_iter()
            .map(|(action, config)| {
                let limit = Limit {
                    bucket: Mutex::new(TokenBucket::new(config.burst, config.per_second)),
                    max_wait: Duration::from_millis(config.max_wait_ms),
                };
                (action.clone(), limit)
            })
            .collect();
        Self { limits }
    }

    /// Non-blocking attempt.
    pub fn try_acquire(&self, action: &str) -> Result<(), Duration> {
        match self.limits.get(action) {
            Some(limit) => limit
                .bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_take(Instant::now()),
            None => Ok(()),
        }
    }

    /// Waits for a token up to the action's `max_wait`. On exhaustion returns
    /// the remaining time until the next token.
    pub async fn acquire(&self, action: &str) -> Result<(), Duration> {
        let Some(limit) = self.limits.get(action) else {
            return Ok(());
        };
        let started = Instant::now();
        loop {
            let now = Instant::now();
            let wait = match limit
                .bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_take(now)
            {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            let waited = now.saturating_duration_since(started);
            if waited.saturating_add(wait) > limit.max_wait {
                debug!("rate limit for '{action}' exhausted its wait budget");
                return Err(wait);
            }
            tokio::time::sleep(wait).await;
        }
    }
}
