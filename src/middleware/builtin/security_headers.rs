//! Security headers stage
//!
//! Adds the protective baseline to every response on the way out, leaving
//! any header the handler (or an inner stage) already set untouched.

use crate::config::SecurityHeadersConfig;
use crate::context::Context;
use crate::error::Result;
use crate::middleware::{ExclusionPolicy, NoExclusions, OutboundMiddleware};
use crate::security::headers::SecurityHeaders;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct SecurityHeadersStage {
    headers: SecurityHeaders,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl SecurityHeadersStage {
    pub fn new() -> Self {
        Self::with_headers(SecurityHeaders::default())
    }

    pub fn with_headers(headers: SecurityHeaders) -> Self {
        Self {
            headers,
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &SecurityHeadersConfig) -> Self {
        Self::with_headers(SecurityHeaders::from_config(config))
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }
}

impl Default for SecurityHeadersStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundMiddleware for SecurityHeadersStage {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        if let Some(response) = ctx.response_mut() {
            self.headers.apply(response);
        }
        Ok(())
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}
