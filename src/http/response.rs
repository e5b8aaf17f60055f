use hyper::StatusCode;
use serde_json::Value;

/// Outbound HTTP response as seen by the pipeline
///
/// Headers are kept as an ordered list so that multi-valued headers
/// (`Set-Cookie`) survive, while lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn not_found() -> Self {
        Self::text("Not Found").with_status(StatusCode::NOT_FOUND)
    }

    /// Generic 500 used whenever a stage faults
    pub fn internal_error() -> Self {
        Self::json_value(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "message": "Server Error" }),
        )
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND).with_header("Location", location)
    }

    /// JSON response from an already-built value
    pub fn json_value(status: StatusCode, value: Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    pub fn json(value: Value) -> Self {
        Self::json_value(StatusCode::OK, value)
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(content.into().into_bytes())
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(content.into().into_bytes())
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Append a header, keeping any existing value with the same name
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Replace every header with this name by a single value
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.add_header(name, value);
    }

    /// Add the header only if the response does not carry it yet
    ///
    /// Returns whether the header was inserted.
    pub fn set_header_if_absent(&mut self, name: &str, value: &str) -> bool {
        if self.has_header(name) {
            return false;
        }
        self.add_header(name, value);
        true
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Media type without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or(value)
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the body size in bytes
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn into_hyper(self) -> hyper::Response<hyper::Body> {
        let mut builder = hyper::Response::builder().status(self.status);

        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        builder
            .body(hyper::Body::from(self.body))
            .unwrap_or_else(|_| hyper::Response::new(hyper::Body::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = Response::ok().with_header("X-Cache", "HIT");
        assert_eq!(response.header("x-cache"), Some("HIT"));
        assert!(response.has_header("X-CACHE"));
    }

    #[test]
    fn test_set_header_if_absent_never_overwrites() {
        let mut response = Response::ok().with_header("X-Frame-Options", "SAMEORIGIN");

        assert!(!response.set_header_if_absent("x-frame-options", "DENY"));
        assert!(response.set_header_if_absent("Referrer-Policy", "no-referrer"));
        assert_eq!(response.header("X-Frame-Options"), Some("SAMEORIGIN"));
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let response = Response::html("<p>hi</p>");
        assert_eq!(response.content_type().as_deref(), Some("text/html"));
    }
}
