//! Built-in pipeline stages
//!
//! Listed in the order [`Pipeline::standard`](crate::middleware::Pipeline::standard)
//! registers them.

pub mod logging;
pub mod rate_limit;
pub mod csrf;
pub mod auth;
pub mod authorization;
pub mod sanitization;
pub mod xss;
pub mod sql_injection;
pub mod security_headers;
pub mod response_cache;
pub mod compression;
pub mod response_time;

pub use auth::Authentication;
pub use authorization::Authorization;
pub use compression::ResponseCompression;
pub use csrf::CsrfProtection;
pub use logging::RequestLogger;
pub use rate_limit::RateLimiter;
pub use response_cache::ResponseCache;
pub use response_time::ResponseTimeTracker;
pub use sanitization::InputSanitizer;
pub use security_headers::SecurityHeadersStage;
pub use sql_injection::SqlInjectionGuard;
pub use xss::XssProtection;
