//! Inbound/outbound stage traits
//!
//! A stage can work on the request on the way in, on the response on the
//! way out, or both. The two halves share state through the typed data
//! slots on [`Context`].

use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;

/// Action to take after a stage processed the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    /// Continue to the next stage
    Continue,

    /// Stop the chain and use the response set on context
    Stop,

    /// Continue and make sure this stage sees the response
    Capture,
}

/// Stage half that runs before the handler
///
/// Inbound stages can:
/// - Modify the request held by the context
/// - Short-circuit with their own response
/// - Register for outbound processing
#[async_trait]
pub trait InboundMiddleware: Send + Sync + 'static {
    /// Process an incoming request
    ///
    /// # Returns
    /// - `Continue`: pass to the next stage
    /// - `Stop`: return the response set on the context, skip the rest of the chain
    /// - `Capture`: continue and guarantee outbound processing
    async fn process_request(&self, ctx: &mut Context) -> Result<InboundAction>;

    /// Whether this stage applies to the request at all
    ///
    /// A stage that does not run is skipped in both directions.
    fn should_run(&self, _ctx: &Context) -> bool {
        true
    }
}

/// Stage half that runs after the handler, in reverse order
#[async_trait]
pub trait OutboundMiddleware: Send + Sync + 'static {
    /// Process the outgoing response held in `ctx.res`
    async fn process_response(&self, ctx: &mut Context) -> Result<()>;

    /// Only consulted for outbound-only stages; a dual stage is gated by
    /// its inbound half.
    fn should_run(&self, _ctx: &Context) -> bool {
        true
    }

    /// Also post-process responses produced by an earlier stage that
    /// stopped the chain, even though this stage's inbound half never ran
    fn runs_after_stop(&self) -> bool {
        false
    }
}

/// A named stage with its phases
pub struct MiddlewareInstance {
    pub name: String,
    pub inbound: Option<Box<dyn InboundMiddleware>>,
    pub outbound: Option<Box<dyn OutboundMiddleware>>,
}

impl MiddlewareInstance {
    /// Create an inbound-only stage
    pub fn inbound<M: InboundMiddleware>(name: &str, middleware: M) -> Self {
        Self {
            name: name.to_string(),
            inbound: Some(Box::new(middleware)),
            outbound: None,
        }
    }

    /// Create an outbound-only stage
    pub fn outbound<M: OutboundMiddleware>(name: &str, middleware: M) -> Self {
        Self {
            name: name.to_string(),
            inbound: None,
            outbound: Some(Box::new(middleware)),
        }
    }

    /// Create a dual-phase stage
    pub fn dual<M>(name: &str, middleware: M) -> Self
    where
        M: InboundMiddleware + OutboundMiddleware + Clone + 'static,
    {
        Self {
            name: name.to_string(),
            inbound: Some(Box::new(middleware.clone())),
            outbound: Some(Box::new(middleware)),
        }
    }

    pub fn has_inbound(&self) -> bool {
        self.inbound.is_some()
    }

    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }
}

impl std::fmt::Debug for MiddlewareInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareInstance")
            .field("name", &self.name)
            .field("inbound", &self.has_inbound())
            .field("outbound", &self.has_outbound())
            .finish()
    }
}
