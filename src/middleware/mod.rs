//! Stage chain and its executor
//!
//! A [`Pipeline`] holds an ordered list of stages and a terminal
//! [`Handler`]. Requests go through the inbound halves in order, then the
//! handler, then the outbound halves of the stages that ran, in reverse.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden::middleware::{Pipeline, builtin::ResponseTimeTracker};
//! use warden::http::{Request, Response};
//!
//! let pipeline = Pipeline::builder()
//!     .dual("timing", ResponseTimeTracker::new(1000))
//!     .handler_fn(|_req: &Request| Ok(Response::text("hello")))
//!     .build();
//!
//! let response = pipeline.handle(Request::new("GET", "/")).await;
//! assert!(response.has_header("X-Response-Time"));
//! ```

pub mod builtin;
pub mod exclusion;
pub mod traits;

pub use exclusion::{ExclusionPolicy, NoExclusions, PathExclusions};
pub use traits::{InboundAction, InboundMiddleware, MiddlewareInstance, OutboundMiddleware};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::logging::Logger;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Terminal request handler behind the stages
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, req: &Request) -> Result<Response>;
}

/// Adapter for plain functions and closures
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Result<Response> + Send + Sync + 'static,
{
    async fn handle(&self, req: &Request) -> Result<Response> {
        (self.0)(req)
    }
}

/// Handler used when none was configured
struct NotFoundHandler;

#[async_trait]
impl Handler for NotFoundHandler {
    async fn handle(&self, _req: &Request) -> Result<Response> {
        Ok(Response::not_found())
    }
}

pub struct Pipeline {
    stages: Vec<MiddlewareInstance>,
    handler: Arc<dyn Handler>,
    logger: Logger,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    /// Drive one request through the chain
    ///
    /// Always produces a response: stage errors and panics are logged and
    /// turned into a generic 500, which the stages that already ran still
    /// post-process.
    pub async fn handle(&self, request: Request) -> Response {
        let mut ctx = Context::new(request);
        let mut outbound_stack: Vec<&MiddlewareInstance> = Vec::with_capacity(self.stages.len());
        let mut early_response = None;

        // Phase 1: INBOUND
        for (index, stage) in self.stages.iter().enumerate() {
            let inbound = match stage.inbound.as_ref() {
                Some(inbound) => inbound,
                None => {
                    if stage
                        .outbound
                        .as_ref()
                        .map(|outbound| outbound.should_run(&ctx))
                        .unwrap_or(false)
                    {
                        outbound_stack.push(stage);
                    }
                    continue;
                }
            };

            if !inbound.should_run(&ctx) {
                log::trace!("Stage '{}' skipped for {}", stage.name, ctx.req.path);
                continue;
            }

            match guarded(inbound.process_request(&mut ctx)).await {
                Ok(InboundAction::Continue) => {
                    if stage.has_outbound() {
                        outbound_stack.push(stage);
                    }
                }
                Ok(InboundAction::Capture) => outbound_stack.push(stage),
                Ok(InboundAction::Stop) => {
                    log::debug!("Stage '{}' stopped chain", stage.name);
                    let response = match ctx.take_response() {
                        Some(response) => response,
                        None => {
                            let error =
                                Error::stage_fault(&stage.name, "stopped without a response");
                            self.report_fault(&stage.name, &ctx, &error);
                            Response::internal_error()
                        }
                    };
                    early_response = Some(response);
                    self.push_after_stop(index, &ctx, &mut outbound_stack);
                    break;
                }
                Err(error) => {
                    self.report_fault(&stage.name, &ctx, &error);
                    early_response = Some(Response::internal_error());
                    self.push_after_stop(index, &ctx, &mut outbound_stack);
                    break;
                }
            }
        }

        // Phase 2: HANDLER
        let response = match early_response {
            Some(response) => response,
            None => match guarded(self.handler.handle(&ctx.req)).await {
                Ok(response) => response,
                Err(error) if error.status_code() < 500 => error.to_response(),
                Err(error) => {
                    self.report_fault("handler", &ctx, &error);
                    Response::internal_error()
                }
            },
        };
        ctx.set_response(response);

        // Phase 3: OUTBOUND, in reverse
        for stage in outbound_stack.iter().rev() {
            if let Some(outbound) = stage.outbound.as_ref() {
                if let Err(error) = guarded(outbound.process_response(&mut ctx)).await {
                    self.report_fault(&stage.name, &ctx, &error);
                    ctx.set_response(Response::internal_error());
                }
            }
        }

        ctx.take_response().unwrap_or_else(Response::internal_error)
    }

    /// Queue the later stages that post-process even early responses
    fn push_after_stop<'a>(
        &'a self,
        stopped_at: usize,
        ctx: &Context,
        outbound_stack: &mut Vec<&'a MiddlewareInstance>,
    ) {
        for stage in &self.stages[stopped_at + 1..] {
            let outbound = match stage.outbound.as_ref() {
                Some(outbound) if outbound.runs_after_stop() => outbound,
                _ => continue,
            };
            let applies = match stage.inbound.as_ref() {
                Some(inbound) => inbound.should_run(ctx),
                None => outbound.should_run(ctx),
            };
            if applies {
                outbound_stack.push(stage);
            }
        }
    }

    fn report_fault(&self, stage: &str, ctx: &Context, error: &Error) {
        let mut context = ctx.requester();
        context.insert("stage".to_string(), json!(stage));
        context.insert("code".to_string(), json!(error.error_code()));
        context.insert("error".to_string(), json!(error.to_string()));
        self.logger.error("Pipeline stage failed", context);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Run a stage future, turning a panic into a stage error
async fn guarded<T, F>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::stage_fault("panic", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ordered stage list under construction
pub struct PipelineBuilder {
    stages: Vec<MiddlewareInstance>,
    handler: Option<Arc<dyn Handler>>,
    logger: Logger,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            handler: None,
            logger: Logger::default(),
        }
    }
}

impl PipelineBuilder {
    /// Append an inbound-only stage
    pub fn inbound<M: InboundMiddleware>(mut self, name: &str, middleware: M) -> Self {
        self.stages.push(MiddlewareInstance::inbound(name, middleware));
        self
    }

    /// Append an outbound-only stage
    pub fn outbound<M: OutboundMiddleware>(mut self, name: &str, middleware: M) -> Self {
        self.stages.push(MiddlewareInstance::outbound(name, middleware));
        self
    }

    /// Append a dual-phase stage
    pub fn dual<M>(mut self, name: &str, middleware: M) -> Self
    where
        M: InboundMiddleware + OutboundMiddleware + Clone + 'static,
    {
        self.stages.push(MiddlewareInstance::dual(name, middleware));
        self
    }

    pub fn stage(mut self, instance: MiddlewareInstance) -> Self {
        self.stages.push(instance);
        self
    }

    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn handler_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response> + Send + Sync + 'static,
    {
        self.handler(FnHandler(handler))
    }

    /// Logger receiving stage fault reports
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            handler: self.handler.unwrap_or_else(|| Arc::new(NotFoundHandler)),
            logger: self.logger,
        }
    }
}
