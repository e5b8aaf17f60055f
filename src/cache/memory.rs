use super::{CacheEntry, CacheKey, CacheStats};
use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory TTL cache safe for concurrent use
///
/// Writes replace whole entries; a value is never mutated in place.
pub struct MemoryCache<T: Clone + Send + Sync + 'static> {
    entries: DashMap<CacheKey, CacheEntry<T>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> MemoryCache<T> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired_cleanups: AtomicU64::new(0),
        }
    }

    /// Live value for `key`; expired entries count as a miss and are dropped
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        let found = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match found {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                self.entries
                    .remove_if(key, |_, entry| entry.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: T, ttl: Duration) {
        // Occasionally clean up expired entries (1% chance)
        if rand::random::<f32>() < 0.01 {
            self.purge_expired();
        }

        let now = self.clock.now();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.expired_cleanups
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
