//! Request logging stage
//!
//! Logs the start of every request (method, URL, IP, user agent and the
//! submitted input) and its completion with status and duration, both
//! tagged with a per-request id. The
//! [`Logger`] scrubs sensitive fields, so passwords and tokens in the
//! input never reach the sink.

use crate::context::Context;
use crate::error::Result;
use crate::logging::Logger;
use crate::middleware::{
    ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions, OutboundMiddleware,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const START_KEY: &str = "request_logger.start";
const ID_KEY: &str = "request_logger.id";

/// Request start/completion logging
#[derive(Clone)]
pub struct RequestLogger {
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl RequestLogger {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }
}

#[async_trait]
impl InboundMiddleware for RequestLogger {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut context = ctx.requester();
        context.insert("request_id".to_string(), json!(request_id));
        context.insert("input".to_string(), ctx.req.all_input());
        self.logger.info("Request started", context);

        ctx.set(ID_KEY, request_id);
        ctx.set(START_KEY, Instant::now());
        Ok(InboundAction::Capture)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}

#[async_trait]
impl OutboundMiddleware for RequestLogger {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let duration_ms = ctx
            .get::<Instant>(START_KEY)
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or_default();
        let status = ctx.res.as_ref().map(|r| r.status.as_u16()).unwrap_or(500);

        let mut context = ctx.requester();
        context.insert("request_id".to_string(), json!(ctx.get::<String>(ID_KEY)));
        context.insert("status".to_string(), json!(status));
        context.insert("duration_ms".to_string(), json!(round_ms(duration_ms)));
        self.logger.info("Request completed", context);

        Ok(())
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
