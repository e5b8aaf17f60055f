//! Authentication stage
//!
//! Tries each guard in order; the first one that recognises the caller
//! binds its principal to the request. Requests nobody recognises get a
//! 401 JSON body, or a redirect to the login page for browsers.

use crate::auth::Guard;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::Response;
use crate::logging::Logger;
use crate::middleware::{ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct Authentication {
    guards: Vec<Arc<dyn Guard>>,
    login_url: String,
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl Authentication {
    pub fn new(guards: Vec<Arc<dyn Guard>>) -> Self {
        Self {
            guards,
            login_url: "/login".to_string(),
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    /// Where browsers are sent when unauthenticated
    pub fn login_url(mut self, url: &str) -> Self {
        self.login_url = url.to_string();
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

    pub fn guard_names(&self) -> Vec<&str> {
        self.guards.iter().map(|guard| guard.name()).collect()
    }
}

#[async_trait]
impl InboundMiddleware for Authentication {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        if ctx.principal().is_some() {
            return Ok(InboundAction::Continue);
        }

        for guard in &self.guards {
            if let Some(principal) = guard.authenticate(&ctx.req).await? {
                log::debug!("Guard '{}' authenticated '{}'", guard.name(), principal.id);
                ctx.req.principal = Some(principal);
                return Ok(InboundAction::Continue);
            }
        }

        let mut context = ctx.requester();
        context.insert(
            "guard".to_string(),
            json!(self.guards.last().map(|guard| guard.name())),
        );
        self.logger.warning("Unauthenticated request", context);

        let response = if ctx.req.expects_json() {
            Error::unauthenticated("no guard accepted the request").to_response()
        } else {
            Response::redirect(&self.login_url)
        };
        ctx.set_response(response);
        Ok(InboundAction::Stop)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}
