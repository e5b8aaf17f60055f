//! warden - a composable HTTP request-processing pipeline
//!
//! warden runs every request through an ordered chain of stages before it
//! reaches the application handler, and the response back out through the
//! same stages in reverse:
//! - request logging with sensitive fields redacted
//! - fixed-window rate limiting per IP, user or route
//! - CSRF token verification
//! - authentication guards and role/permission authorization
//! - input sanitization plus XSS and SQL-injection guards
//! - security headers, response caching, gzip and response timing
//!
//! ```rust,ignore
//! use warden::prelude::*;
//!
//! let config = WardenConfig::load("warden.toml")?;
//! let pipeline = Pipeline::standard(&config, Services::default(), my_handler)?;
//! let response = pipeline.handle(request).await;
//! ```

// No panicking shortcuts outside tests
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod app;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod configuration;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod security;

// Re-export main types for public API
pub use app::{access_control, Services};
pub use config::WardenConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use http::{Request, Response, Server};
pub use middleware::{
    Handler, InboundAction, InboundMiddleware, OutboundMiddleware, Pipeline, PipelineBuilder,
};

// Re-export commonly used external types
pub use serde_json::{json, Value};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::auth::{
        AccessControl, BearerTokenGuard, Guard, Principal, RoleHierarchy, RoleProvider,
        SessionGuard, StaticRoleProvider, StaticTokenResolver,
    };
    pub use crate::cache::{CacheStore, MemoryCache, MemoryRateLimitStore, RateLimitStore};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::configuration::{ConfigProvider, EnvProvider, MapProvider, TomlProvider};
    pub use crate::logging::{Logger, MemorySink};
    pub use crate::middleware::builtin::{
        Authentication, Authorization, CsrfProtection, InputSanitizer, RateLimiter, RequestLogger,
        ResponseCache, ResponseCompression, ResponseTimeTracker, SecurityHeadersStage,
        SqlInjectionGuard, XssProtection,
    };
    pub use crate::middleware::{ExclusionPolicy, FnHandler, PathExclusions};
    pub use crate::*;
}
