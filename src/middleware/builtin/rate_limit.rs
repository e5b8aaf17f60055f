//! Fixed-window rate limiting stage
//!
//! Counts attempts per identifier (IP, user or route) in a shared
//! [`RateLimitStore`]. Keys are namespaced by the limiter name, so an
//! `api` and an `auth` limiter can share one store without interfering.

use crate::cache::RateLimitStore;
use crate::config::{IdentifierStrategy, RateLimitConfig};
use crate::context::Context;
use crate::error::Result;
use crate::http::Response;
use crate::logging::Logger;
use crate::middleware::{
    ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions, OutboundMiddleware,
};
use async_trait::async_trait;
use hyper::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const STATE_KEY: &str = "rate_limit.state";

/// Window state carried from the inbound to the outbound half
#[derive(Debug, Clone, Copy)]
struct LimitState {
    limit: u64,
    remaining: u64,
    reset_at: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    name: String,
    max_attempts: u64,
    decay: Duration,
    strategy: IdentifierStrategy,
    trust_proxy: bool,
    store: Arc<dyn RateLimitStore>,
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl RateLimiter {
    /// `max_attempts` per `decay` window, keyed by client IP
    pub fn new(store: Arc<dyn RateLimitStore>, max_attempts: u64, decay: Duration) -> Self {
        Self {
            name: "global".to_string(),
            max_attempts,
            decay,
            strategy: IdentifierStrategy::Ip,
            trust_proxy: false,
            store,
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self::new(
            store,
            config.max_attempts,
            Duration::from_secs(config.decay_minutes.saturating_mul(60)),
        )
        .named(&config.name)
        .identify_by(config.identifier)
        .trust_proxy(config.trust_proxy)
    }

    /// Namespace for this limiter's keys
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn identify_by(mut self, strategy: IdentifierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Whether to read the client address from `X-Forwarded-For` / `X-Real-IP`
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    /// Identifier of the caller under the configured strategy
    ///
    /// The user strategy falls back to the IP for anonymous requests.
    pub fn identifier(&self, ctx: &Context) -> String {
        match self.strategy {
            IdentifierStrategy::User => match ctx.principal() {
                Some(principal) => format!("user:{}", principal.id),
                None => format!("ip:{}", ctx.req.ip(self.trust_proxy)),
            },
            IdentifierStrategy::Route => format!("route:{} {}", ctx.req.method, ctx.req.path),
            IdentifierStrategy::Ip => format!("ip:{}", ctx.req.ip(self.trust_proxy)),
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.name, identifier)
    }

    fn too_many_attempts(&self, retry_after: u64, reset_at: u64) -> Response {
        let retry = retry_after.to_string();
        Response::json_value(
            StatusCode::TOO_MANY_REQUESTS,
            json!({
                "error": "Too Many Attempts.",
                "message": format!(
                    "Too many requests. Please try again in {} seconds.",
                    retry_after
                ),
                "retry_after": retry_after,
            }),
        )
        .with_header("Retry-After", &retry)
        .with_header("X-RateLimit-Limit", &self.max_attempts.to_string())
        .with_header("X-RateLimit-Remaining", "0")
        .with_header("X-RateLimit-Reset", &reset_at.to_string())
    }
}

#[async_trait]
impl InboundMiddleware for RateLimiter {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let identifier = self.identifier(ctx);
        let hit = self.store.hit(&self.key(&identifier), self.decay);

        if hit.attempts > self.max_attempts {
            let mut context = ctx.requester();
            context.insert("identifier".to_string(), json!(identifier));
            context.insert("limiter".to_string(), json!(self.name));
            context.insert("attempts".to_string(), json!(hit.attempts));
            self.logger.warning("Rate limit exceeded", context);

            ctx.set_response(self.too_many_attempts(hit.retry_after, hit.reset_at));
            return Ok(InboundAction::Stop);
        }

        ctx.set(
            STATE_KEY,
            LimitState {
                limit: self.max_attempts,
                remaining: self.max_attempts.saturating_sub(hit.attempts),
                reset_at: hit.reset_at,
            },
        );
        Ok(InboundAction::Capture)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}

#[async_trait]
impl OutboundMiddleware for RateLimiter {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let state = match ctx.get::<LimitState>(STATE_KEY) {
            Some(state) => *state,
            None => return Ok(()),
        };

        if let Some(response) = ctx.response_mut() {
            response.set_header("X-RateLimit-Limit", &state.limit.to_string());
            response.set_header("X-RateLimit-Remaining", &state.remaining.to_string());
            response.set_header("X-RateLimit-Reset", &state.reset_at.to_string());
        }
        Ok(())
    }
}
