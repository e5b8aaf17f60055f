//! CSRF verification stage
//!
//! Mutating requests must present the token bound to their session, via
//! one of (checked in order):
//! - the `X-CSRF-TOKEN` header
//! - a `_token` form or JSON field
//! - the URL-encoded `X-XSRF-TOKEN` header that JavaScript clients echo
//!   back from the `XSRF-TOKEN` cookie
//!
//! On the way out the session's current token is published both as a
//! header and as that cookie.

use crate::config::CsrfConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::Request;
use crate::logging::Logger;
use crate::middleware::{
    ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions, OutboundMiddleware,
};
use crate::security::CsrfTokenManager;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use std::sync::Arc;

const SESSION_KEY: &str = "csrf.session";

#[derive(Clone)]
pub struct CsrfProtection {
    tokens: Arc<CsrfTokenManager>,
    session_cookie: String,
    cookie_name: String,
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl CsrfProtection {
    pub fn new(tokens: Arc<CsrfTokenManager>) -> Self {
        Self {
            tokens,
            session_cookie: "warden_session".to_string(),
            cookie_name: "XSRF-TOKEN".to_string(),
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn from_config(config: &CsrfConfig, tokens: Arc<CsrfTokenManager>) -> Self {
        let mut stage = Self::new(tokens);
        stage.session_cookie = config.session_cookie.clone();
        stage.cookie_name = config.cookie_name.clone();
        stage
    }

    /// Cookie that carries the session id
    pub fn session_cookie(mut self, name: &str) -> Self {
        self.session_cookie = name.to_string();
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

    /// Token presented by the client, first source wins
    fn presented_token(req: &Request) -> Option<String> {
        if let Some(token) = req.header("x-csrf-token") {
            return Some(token.to_string());
        }
        if let Some(token) = req.input("_token").and_then(|value| value.as_str()) {
            return Some(token.to_string());
        }
        req.header("x-xsrf-token").map(|token| {
            urlencoding::decode(token)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| token.to_string())
        })
    }

    fn token_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; SameSite=Lax",
            self.cookie_name,
            utf8_percent_encode(token, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl InboundMiddleware for CsrfProtection {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let session = ctx.req.session(&self.session_cookie);

        if !ctx.req.is_read_only() {
            let valid = match (&session, Self::presented_token(&ctx.req)) {
                (Some(session), Some(token)) => self.tokens.validate(session, &token),
                _ => false,
            };

            if !valid {
                let mut context = ctx.requester();
                context.insert("has_session".to_string(), json!(session.is_some()));
                self.logger.warning("CSRF token mismatch", context);

                ctx.set_response(Error::CsrfMismatch.to_response());
                return Ok(InboundAction::Stop);
            }
        }

        match session {
            Some(session) => {
                ctx.set(SESSION_KEY, session);
                Ok(InboundAction::Capture)
            }
            None => Ok(InboundAction::Continue),
        }
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}

#[async_trait]
impl OutboundMiddleware for CsrfProtection {
    async fn process_response(&self, ctx: &mut Context) -> Result<()> {
        let session = match ctx.get::<String>(SESSION_KEY) {
            Some(session) => session.clone(),
            None => return Ok(()),
        };
        let token = self.tokens.token_or_generate(&session);
        let cookie = self.token_cookie(&token);

        if let Some(response) = ctx.response_mut() {
            response.set_header("X-CSRF-TOKEN", &token);
            response.add_header("Set-Cookie", &cookie);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::Response;
    use crate::logging::MemorySink;
    use crate::middleware::{PathExclusions, Pipeline};
    use std::time::Duration;

    fn pipeline(tokens: Arc<CsrfTokenManager>, sink: Arc<MemorySink>) -> Pipeline {
        let stage = CsrfProtection::new(tokens)
            .with_logger(Logger::new(sink))
            .with_exclusions(PathExclusions::new(["/webhooks/*"]));
        Pipeline::builder()
            .dual("csrf", stage)
            .handler_fn(|_req: &Request| Ok(Response::text("done")))
            .build()
    }

    fn post(session: &str) -> Request {
        Request::new("POST", "/profile")
            .with_header("Cookie", &format!("warden_session={}", session))
    }

    #[tokio::test]
    async fn test_token_sources_are_accepted() {
        let tokens = Arc::new(CsrfTokenManager::new());
        let token = tokens.generate_token("s1");
        let pipeline = pipeline(tokens.clone(), Arc::new(MemorySink::new()));

        let by_header = post("s1").with_header("X-CSRF-TOKEN", &token);
        let by_field = post("s1").with_body_param("_token", token.as_str());
        let by_json = post("s1").with_json(json!({ "_token": token }));
        let by_cookie_echo = post("s1").with_header("X-XSRF-TOKEN", &token);

        for request in [by_header, by_field, by_json, by_cookie_echo] {
            let response = pipeline.handle(request).await;
            assert_eq!(response.status.as_u16(), 200);
        }
    }

    #[tokio::test]
    async fn test_mismatch_is_419() {
        let tokens = Arc::new(CsrfTokenManager::new());
        tokens.generate_token("s1");
        let sink = Arc::new(MemorySink::new());
        let pipeline = pipeline(tokens, sink.clone());

        for request in [
            post("s1").with_header("X-CSRF-TOKEN", "forged"),
            post("s1"),
            Request::new("DELETE", "/profile").with_header("X-CSRF-TOKEN", "anything"),
        ] {
            let response = pipeline.handle(request).await;
            assert_eq!(response.status.as_u16(), 419);
            let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
            assert_eq!(body, json!({"message": "CSRF token mismatch."}));
        }
        assert_eq!(sink.entries().len(), 3);
    }

    #[tokio::test]
    async fn test_read_only_requests_receive_token() {
        let tokens = Arc::new(CsrfTokenManager::new());
        let pipeline = pipeline(tokens.clone(), Arc::new(MemorySink::new()));

        let response = pipeline
            .handle(Request::new("GET", "/form").with_session("s9"))
            .await;

        let token = tokens.token("s9").unwrap();
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.header("X-CSRF-TOKEN"), Some(token.as_str()));
        assert_eq!(
            response.header("Set-Cookie"),
            Some(format!("XSRF-TOKEN={}; Path=/; SameSite=Lax", token).as_str())
        );
    }

    #[tokio::test]
    async fn test_tokens_for_abandoned_sessions_do_not_accumulate() {
        let clock = Arc::new(ManualClock::at_unix(50_000));
        let tokens = Arc::new(
            CsrfTokenManager::with_clock(clock.clone()).with_ttl(Duration::from_secs(600)),
        );
        let pipeline = pipeline(tokens.clone(), Arc::new(MemorySink::new()));

        for i in 0..1000 {
            let request = Request::new("GET", "/form")
                .with_header("Cookie", &format!("warden_session=anon-{}", i));
            pipeline.handle(request).await;
        }
        assert_eq!(tokens.len(), 1000);

        clock.advance(Duration::from_secs(601));
        tokens.purge_expired();
        assert!(tokens.is_empty());

        let fresh = pipeline.handle(Request::new("GET", "/form").with_session("s1")).await;
        assert_eq!(fresh.header("X-CSRF-TOKEN").map(str::len), Some(40));
        assert_eq!(tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_paths_are_untouched() {
        let tokens = Arc::new(CsrfTokenManager::new());
        let pipeline = pipeline(tokens.clone(), Arc::new(MemorySink::new()));

        let response = pipeline
            .handle(Request::new("POST", "/webhooks/stripe").with_session("s2"))
            .await;

        assert_eq!(response.status.as_u16(), 200);
        assert!(!response.has_header("X-CSRF-TOKEN"));
        assert!(tokens.is_empty());
    }
}
