use super::memory::MemoryCache;
use crate::http::{Request, Response};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Headers describing one particular exchange, never replayed from cache
const PER_REQUEST_HEADERS: &[&str] = &["x-response-time", "x-cache"];

/// Snapshot of a response as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter(|(name, _)| {
                    !PER_REQUEST_HEADERS
                        .iter()
                        .any(|skip| name.eq_ignore_ascii_case(skip))
                })
                .cloned()
                .collect(),
            body: response.body.clone(),
        }
    }

    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::new(status).with_body(self.body.clone());
        response.headers = self.headers.clone();
        response
    }
}

/// Storage behind the response cache stage
pub trait CacheStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<CachedResponse>;

    fn put(&self, key: &str, response: CachedResponse, ttl: Duration);

    fn remove(&self, key: &str);

    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache<CachedResponse> {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        MemoryCache::get(self, key)
    }

    fn put(&self, key: &str, response: CachedResponse, ttl: Duration) {
        MemoryCache::put(self, key, response, ttl)
    }

    fn remove(&self, key: &str) {
        MemoryCache::remove(self, key);
    }

    fn purge_expired(&self) -> usize {
        MemoryCache::purge_expired(self)
    }

    fn len(&self) -> usize {
        MemoryCache::len(self)
    }
}

/// Fingerprint of a request for the response cache
///
/// SHA-256 over method, path, query sorted by name, the caller's
/// authorization context and the listed vary headers. Two callers with
/// different credentials never share a key.
pub fn cache_key(req: &Request, vary_headers: &[String]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(req.method.as_bytes());
    hasher.update(b"\n");
    hasher.update(req.path.as_bytes());
    hasher.update(b"\n");

    let sorted: BTreeMap<&String, &serde_json::Value> = req.query.iter().collect();
    for (name, value) in sorted {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"&");
    }
    hasher.update(b"\n");

    hasher.update(b"auth:");
    if let Some(authorization) = req.authorization() {
        hasher.update(Sha256::digest(authorization.as_bytes()));
    }
    if let Some(principal) = &req.principal {
        hasher.update(b"principal:");
        hasher.update(principal.id.as_bytes());
    }
    hasher.update(b"\n");

    for name in vary_headers {
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        if let Some(value) = req.header(name) {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}

/// 2xx with a JSON or HTML body
pub fn is_cacheable(response: &Response) -> bool {
    if !response.is_success() {
        return false;
    }
    match response.content_type() {
        Some(ct) => ct == "application/json" || ct.ends_with("+json") || ct == "text/html",
        None => false,
    }
}
