//! SQL-injection guard
//!
//! Scans every string in the query, the form body and the JSON payload.
//! The first match rejects the request with a 400; the log entry names the
//! offending field and carries the full input with secrets redacted.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::logging::Logger;
use crate::middleware::{ExclusionPolicy, InboundAction, InboundMiddleware, NoExclusions};
use crate::security::find_sql_injection;
use async_trait::async_trait;
use hyper::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct SqlInjectionGuard {
    logger: Logger,
    exclusions: Arc<dyn ExclusionPolicy>,
}

impl SqlInjectionGuard {
    pub fn new() -> Self {
        Self {
            logger: Logger::default(),
            exclusions: Arc::new(NoExclusions),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_exclusions<P: ExclusionPolicy>(mut self, exclusions: P) -> Self {
        self.exclusions = Arc::new(exclusions);
        self
    }

    /// Dotted path of the first suspicious field, e.g. `json.filter.ids.1`
    pub fn scan(req: &Request) -> Option<String> {
        find_sql_injection(&Value::Object(req.query.clone()), "query")
            .or_else(|| find_sql_injection(&Value::Object(req.body.clone()), "body"))
            .or_else(|| {
                req.json
                    .as_ref()
                    .and_then(|json| find_sql_injection(json, "json"))
            })
    }
}

impl Default for SqlInjectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InboundMiddleware for SqlInjectionGuard {
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction> {
        let field = match Self::scan(&ctx.req) {
            Some(field) => field,
            None => return Ok(InboundAction::Continue),
        };

        let mut context = ctx.requester();
        context.insert("field".to_string(), json!(field));
        context.insert("input".to_string(), ctx.req.all_input());
        self.logger.warning("SQL injection attempt detected", context);

        let error = Error::sql_pattern(field);
        ctx.set_response(Response::json_value(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "Bad Request",
                "message": error.public_message(),
            }),
        ));
        Ok(InboundAction::Stop)
    }

    fn should_run(&self, ctx: &Context) -> bool {
        !self.exclusions.is_excluded(&ctx.req)
    }
}
