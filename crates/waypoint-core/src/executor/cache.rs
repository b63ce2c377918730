//! TTL cache of successful results, keyed by fingerprint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::Fingerprint;
use crate::models::ResultRef;

/// A cached result handle; read-only until it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload_ref: ResultRef,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-wide result cache.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for `fingerprint`; an expired entry is evicted on the way.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(fingerprint) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Stores a result for `ttl`, dropping every expired entry first. A zero
    /// TTL stores nothing. A live entry is never overwritten.
    pub fn insert(&self, fingerprint: Fingerprint, payload_ref: ResultRef, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| entry.is_live(now));
        if entries.contains_key(&fingerprint) {
            return;
        }
        entries.insert(
            fingerprint.clone(),
            CacheEntry {
                fingerprint,
                payload_ref,
                expires_at: now + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
