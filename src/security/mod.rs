//! Pattern matching, encoding and token primitives used by the stages

pub mod csrf;
pub mod headers;
pub mod patterns;
pub mod redact;
pub mod sanitizer;

pub use csrf::CsrfTokenManager;
pub use headers::{ContentSecurityPolicy, SecurityHeaders};
pub use patterns::{contains_sql_injection, contains_xss};
pub use redact::{is_sensitive_key, redact_map, redact_uri, redact_value, REDACTED};
pub use sanitizer::{
    decode_html, encode_html, find_sql_injection, find_xss, neutralize_xss, strip_tags,
};

/// Compare two strings without short-circuiting on the first difference
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}
