//! Input sanitization stage
//!
//! HTML-entity-encodes every string in the query, the form body and the
//! JSON payload, at any depth. Numbers, booleans and null pass through.

use crate::config::SanitizationConfig;
use crate::context::Context;
use crate::error::Result;
use crate::http::Request;
use crate::middleware::{ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions};
use crate::security::sanitizer::{map_object_strings, map_strings};
use crate::security::{encode_html, strip_tags};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct InputSanitizer {
    strip_tags: bool,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl InputSanitizer {
    pub fn new() -> Self {
        Self {
            strip_tags: false,
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &SanitizationConfig) -> Self {
        Self::new().strip_tags(config.strip_tags)
    }

    /// Drop tags entirely before encoding what is left
    pub fn strip_tags(mut self, strip: bool) -> Self {
        self.strip_tags = strip;
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    pub fn clean(&self, value: &str) -> String {
        if self.strip_tags {
            encode_html(&strip_tags(value))
        } else {
            encode_html(value)
        }
    }

    /// Rewrite every string parameter of `req` in place
    pub fn sanitize(&self, req: &mut Request) {
        let clean = |value: &str| self.clean(value);
        map_object_strings(&mut req.query, &clean);
        map_object_strings(&mut req.body, &clean);
        if let Some(json) = req.json.as_mut() {
            map_strings(json, &clean);
        }
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InboundMiddleware for InputSanitizer {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        self.sanitize(&mut ctx.req);
        Ok(InboundAction::Continue)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}
