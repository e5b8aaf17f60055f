//! Response time header and slow request warnings
//!
//! Every response gets the header, including ones returned early by a
//! stage registered before this one (a cache hit, a 401). Those are timed
//! from the moment the pipeline took the request.

use crate::config::TimingConfig;
use crate::context::Context;
use crate::error::Result;
use crate::logging::Logger;
use crate::middleware::{InboundAction, InboundMiddleware, OutboundMiddleware};
use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};

const START_KEY: &str = "response_time.start";

#[derive(Clone)]
pub struct ResponseTimeTracker {
    slow_threshold: Duration,
    logger: Logger,
}

impl ResponseTimeTracker {
    pub fn new(slow_threshold_ms: u64) -> Self {
        Self {
            slow_threshold: Duration::from_millis(slow_threshold_ms),
            logger: Logger::default(),
        }
    }

    pub fn from_config(config: &TimingConfig) -> Self {
        Self::new(config.slow_threshold_ms)
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

impl Default for ResponseTimeTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl InboundMiddleware for ResponseTimeTracker {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        ctx.set(START_KEY, Instant::now());
        Ok(InboundAction::Capture)
    }
}

#[async_trait]
impl OutboundMiddleware for ResponseTimeTracker {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let elapsed = ctx
            .get::<Instant>(START_KEY)
            .copied()
            .unwrap_or_else(|| ctx.received_at())
            .elapsed();
        let ms = elapsed.as_secs_f64() * 1000.0;

        let status = match ctx.response_mut() {
            Some(response) => {
                response.set_header("X-Response-Time", &format!("{:.2} ms", ms));
                response.status.as_u16()
            }
            None => return Ok(()),
        };

        if elapsed > self.slow_threshold {
            let mut context = serde_json::Map::new();
            context.insert("path".to_string(), json!(ctx.req.path));
            context.insert("method".to_string(), json!(ctx.req.method));
            context.insert("duration_ms".to_string(), json!((ms * 100.0).round() / 100.0));
            context.insert("status".to_string(), json!(status));
            self.logger.warning("Slow request detected", context);
        }
        Ok(())
    }

    fn runs_after_stop(&self) -> bool {
        true
    }
}
