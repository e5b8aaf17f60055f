//! XSS protection stage
//!
//! Inbound, every string input is entity-encoded and `javascript:` URLs are
//! defused. Values that carried an XSS signature are logged, not rejected.
//! Outbound, the browser-side protection headers are added.

use crate::config::XssConfig;
use crate::context::Context;
use crate::error::Result;
use crate::logging::Logger;
use crate::middleware::{
    ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions, OutboundMiddleware,
};
use crate::security::neutralize_xss;
use crate::security::sanitizer::{find_xss, map_object_strings, map_strings};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct XssProtection {
    content_security_policy: Option<String>,
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl XssProtection {
    pub fn new() -> Self {
        Self {
            content_security_policy: None,
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &XssConfig) -> Self {
        let mut stage = Self::new();
        stage.content_security_policy = config.content_security_policy.clone();
        stage
    }

    pub fn content_security_policy(mut self, policy: &str) -> Self {
        self.content_security_policy = Some(policy.to_string());
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
}

impl Default for XssProtection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InboundMiddleware for XssProtection {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let detected = [
            ("query", Value::Object(ctx.req.query.clone())),
            ("body", Value::Object(ctx.req.body.clone())),
            ("json", ctx.req.json.clone().unwrap_or(Value::Null)),
        ]
        .iter()
        .find_map(|(source, value)| find_xss(value, source));

        if let Some(field) = detected {
            let mut context = ctx.requester();
            context.insert("field".to_string(), json!(field));
            self.logger.warning("XSS attempt neutralized", context);
        }

        let neutralize = |value: &str| neutralize_xss(value);
        map_object_strings(&mut ctx.req.query, &neutralize);
        map_object_strings(&mut ctx.req.body, &neutralize);
        if let Some(json) = ctx.req.json.as_mut() {
            map_strings(json, &neutralize);
        }

        Ok(InboundAction::Capture)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}

#[async_trait]
impl OutboundMiddleware for XssProtection {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        if let Some(response) = ctx.response_mut() {
            response.set_header_if_absent("X-XSS-Protection", "1; mode=block");
            response.set_header_if_absent("X-Content-Type-Options", "nosniff");
            if let Some(policy) = &self.content_security_policy {
                response.set_header_if_absent("Content-Security-Policy", policy);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::logging::MemorySink;
    use crate::middleware::{PathExclusions, Pipeline};

    #[tokio::test]
    async fn test_inputs_are_neutralized_and_logged() {
        let sink = Arc::new(MemorySink::new());
        let stage = XssProtection::new().with_logger(Logger::new(sink.clone()));
        let mut ctx = Context::new(
            Request::new("POST", "/profile")
                .with_json(json!({ "links": ["javascript:alert(1)"], "age": 30 })),
        );

        stage.process_request(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.req.json,
            Some(json!({ "links": ["javascript&#58;alert(1)"], "age": 30 }))
        );
        let warning = sink.find("XSS attempt").unwrap();
        assert_eq!(warning.context["field"], "json.links.0");
    }

    #[tokio::test]
    async fn test_clean_input_is_not_logged() {
        let sink = Arc::new(MemorySink::new());
        let stage = XssProtection::new().with_logger(Logger::new(sink.clone()));
        let mut ctx = Context::new(Request::new("GET", "/search?q=rust+async"));

        stage.process_request(&mut ctx).await.unwrap();

        assert!(sink.entries().is_empty());
        assert_eq!(ctx.req.query["q"], json!("rust async"));
    }

    #[tokio::test]
    async fn test_protection_headers() {
        let pipeline = Pipeline::builder()
            .dual(
                "xss",
                XssProtection::new()
                    .content_security_policy("default-src 'self'")
                    .with_exclusions(PathExclusions::new(["/embed"])),
            )
            .handler_fn(|_req: &Request| Ok(Response::html("<p>ok</p>")))
            .build();

        let response = pipeline.handle(Request::new("GET", "/")).await;
        assert_eq!(response.header("X-XSS-Protection"), Some("1; mode=block"));
        assert_eq!(response.header("X-Content-Type-Options"), Some("nosniff"));
        assert_eq!(
            response.header("Content-Security-Policy"),
            Some("default-src 'self'")
        );

        let response = pipeline.handle(Request::new("GET", "/embed")).await;
        assert!(!response.has_header("X-XSS-Protection"));
    }
}
