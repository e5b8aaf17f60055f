//! GET response cache
//!
//! Successful JSON and HTML responses are stored under a fingerprint of
//! the request (see [`cache_key`]) and replayed verbatim until their TTL
//! runs out. Concurrent misses on the same key may both populate it; the
//! last write wins.

use crate::cache::{cache_key, is_cacheable, CacheStore, CachedResponse};
use crate::config::CacheConfig;
use crate::context::Context;
use crate::error::Result;
use crate::middleware::{
    ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions, OutboundMiddleware,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const KEY_SLOT: &str = "response_cache.key";

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    vary_headers: Vec<String>,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            vary_headers: vec!["accept-encoding".to_string()],
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, Duration::from_secs(config.ttl_secs)).vary_on(&config.vary_headers)
    }

    /// Request headers that split the cache, replacing the defaults
    pub fn vary_on<S: AsRef<str>>(mut self, headers: &[S]) -> Self {
        self.vary_headers = headers
            .iter()
            .map(|name| name.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl InboundMiddleware for ResponseCache {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let key = cache_key(&ctx.req, &self.vary_headers);

        if let Some(cached) = self.store.get(&key) {
            log::debug!("Cache hit for {} {}", ctx.req.method, ctx.req.path);
            let mut response = cached.to_response();
            response.set_header("X-Cache", "HIT");
            ctx.set_response(response);
            return Ok(InboundAction::Stop);
        }

        ctx.set(KEY_SLOT, key);
        Ok(InboundAction::Capture)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        ctx.req.method == "GET" && !self.exclusions.is_excluded(&ctx.req)
    }
}

#[async_trait]
impl OutboundMiddleware for ResponseCache {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let key = match ctx.get::<String>(KEY_SLOT) {
            Some(key) => key.clone(),
            None => return Ok(()),
        };
        let response = match ctx.response_mut() {
            Some(response) if is_cacheable(response) => response,
            _ => return Ok(()),
        };

        response.set_header(
            "Cache-Control",
            &format!("public, max-age={}", self.ttl.as_secs()),
        );
        self.store
            .put(&key, CachedResponse::from_response(response), self.ttl);
        response.set_header("X-Cache", "MISS");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::http::{Request, Response};
    use crate::middleware::{PathExclusions, Pipeline};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        calls: Arc<AtomicUsize>,
        pipeline: Pipeline,
        store: Arc<MemoryCache<CachedResponse>>,
    }

    fn counted(clock: Arc<ManualClock>) -> Counted {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(MemoryCache::with_clock(clock));
        let stage = ResponseCache::new(store.clone(), Duration::from_secs(60))
            .with_exclusions(PathExclusions::new(["/live/*"]));

        let seen = calls.clone();
        let pipeline = Pipeline::builder()
            .dual("cache", stage)
            .handler_fn(move |req: &Request| {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(match req.path.as_str() {
                    "/text" => Response::text(format!("call {}", n)),
                    "/missing" => Response::json_value(
                        hyper::StatusCode::NOT_FOUND,
                        json!({ "call": n }),
                    ),
                    _ => Response::json(json!({ "call": n })),
                })
            })
            .build();

        Counted {
            calls,
            pipeline,
            store,
        }
    }

    fn call_number(response: &Response) -> u64 {
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        body["call"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let t = counted(Arc::new(ManualClock::default()));

        let first = t.pipeline.handle(Request::new("GET", "/items?a=1&b=2")).await;
        assert_eq!(first.header("X-Cache"), Some("MISS"));
        assert_eq!(first.header("Cache-Control"), Some("public, max-age=60"));

        let second = t.pipeline.handle(Request::new("GET", "/items?b=2&a=1")).await;
        assert_eq!(second.header("X-Cache"), Some("HIT"));
        assert_eq!(second.header("Cache-Control"), Some("public, max-age=60"));
        assert_eq!(second.body, first.body);
        assert_eq!(call_number(&second), 1);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let t = counted(clock.clone());

        t.pipeline.handle(Request::new("GET", "/items")).await;
        clock.advance(Duration::from_secs(61));

        let response = t.pipeline.handle(Request::new("GET", "/items")).await;
        assert_eq!(response.header("X-Cache"), Some("MISS"));
        assert_eq!(call_number(&response), 2);
    }

    #[tokio::test]
    async fn test_callers_do_not_share_entries() {
        let t = counted(Arc::new(ManualClock::default()));

        let alice = || Request::new("GET", "/me").with_header("Authorization", "Bearer alice");
        let bob = || Request::new("GET", "/me").with_header("Authorization", "Bearer bob");

        assert_eq!(call_number(&t.pipeline.handle(alice()).await), 1);
        assert_eq!(call_number(&t.pipeline.handle(bob()).await), 2);
        assert_eq!(call_number(&t.pipeline.handle(alice()).await), 1);
        assert_eq!(t.store.len(), 2);
    }

    #[tokio::test]
    async fn test_uncacheable_requests_and_responses_pass_through() {
        let t = counted(Arc::new(ManualClock::default()));

        for request in [
            Request::new("POST", "/items"),
            Request::new("GET", "/text"),
            Request::new("GET", "/missing"),
            Request::new("GET", "/live/feed"),
        ] {
            let response = t.pipeline.handle(request).await;
            assert!(!response.has_header("X-Cache"));
            assert!(!response.has_header("Cache-Control"));
        }
        assert!(t.store.is_empty());
        assert_eq!(t.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_vary_headers_are_normalised() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::<CachedResponse>::new());
        let stage = ResponseCache::new(store, Duration::from_secs(5)).vary_on(&["Accept-Language"]);
        assert_eq!(stage.vary_headers, vec!["accept-language".to_string()]);
        assert_eq!(stage.ttl(), Duration::from_secs(5));
    }
}
