//! Time-bounded response cache.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use nicp_core::{Clock, SystemClock};
use std::sync::Arc;

/// Keyed cache whose entries expire `ttl` after insertion.
///
/// Best-effort: concurrent misses on the same key may both refresh it.
pub struct ResponseCache<V> {
    entries: DashMap<String, (DateTime<Utc>, V)>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| now - entry.0 < self.ttl)
            .map(|entry| entry.1.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), (self.clock.now(), value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, (at, _)| now - *at < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
