use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fixed-window counter for one key
#[derive(Debug, Clone)]
struct RateLimitBucket {
    count: u64,
    window_start: u64,
    decay_secs: u64,
}

impl RateLimitBucket {
    fn expired(&self, now: u64) -> bool {
        now >= self.window_start + self.decay_secs
    }
}

/// Outcome of recording one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHit {
    /// Attempts in the current window, including this one
    pub attempts: u64,
    /// Unix time at which the window resets
    pub reset_at: u64,
    /// Seconds until the window resets
    pub retry_after: u64,
}

/// Counter storage behind the rate limiter
pub trait RateLimitStore: Send + Sync + 'static {
    /// Atomically count one attempt against `key` and report the window state
    fn hit(&self, key: &str, decay: Duration) -> RateLimitHit;

    /// Attempts recorded in the live window
    fn attempts(&self, key: &str) -> u64;

    fn reset(&self, key: &str);

    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store; increments run under the key's shard lock
pub struct MemoryRateLimitStore {
    buckets: DashMap<String, RateLimitBucket>,
    clock: Arc<dyn Clock>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(&self, key: &str, decay: Duration) -> RateLimitHit {
        // Occasionally clean up old entries (1% chance), before taking the entry lock
        if rand::random::<f32>() < 0.01 {
            self.purge_expired();
        }

        let now = self.clock.unix_secs();
        let decay_secs = decay.as_secs().max(1);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket {
                count: 0,
                window_start: now,
                decay_secs,
            });

        if bucket.expired(now) {
            bucket.count = 0;
            bucket.window_start = now;
            bucket.decay_secs = decay_secs;
        }

        bucket.count += 1;
        let reset_at = bucket.window_start + bucket.decay_secs;

        RateLimitHit {
            attempts: bucket.count,
            reset_at,
            retry_after: reset_at.saturating_sub(now),
        }
    }

    fn attempts(&self, key: &str) -> u64 {
        let now = self.clock.unix_secs();
        self.buckets
            .get(key)
            .filter(|bucket| !bucket.expired(now))
            .map(|bucket| bucket.count)
            .unwrap_or(0)
    }

    fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.unix_secs();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.expired(now));
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}
