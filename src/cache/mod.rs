//! Shared stores: response cache and rate-limit counters
//!
//! Both stores are concurrent maps sharded by key (DashMap), read their
//! time from an injected [`Clock`](crate::clock::Clock), and purge expired
//! entries opportunistically on write.

pub mod memory;
pub mod rate_limit;
pub mod response;

pub use memory::MemoryCache;
pub use rate_limit::{MemoryRateLimitStore, RateLimitHit, RateLimitStore};
pub use response::{cache_key, is_cacheable, CacheStore, CachedResponse};

use std::time::SystemTime;

pub type CacheKey = String;

/// Stored value with its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
}

impl<T> CacheEntry<T> {
    /// Expired once `now` reaches the deadline
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

/// Counters reported by [`MemoryCache::stats`]
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub expired_cleanups: u64,
}

impl CacheStats {
    /// Share of lookups served from the cache, 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            lookups => self.hits as f64 / lookups as f64,
        }
    }
}
