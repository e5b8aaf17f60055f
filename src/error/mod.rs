use crate::http::Response;
use hyper::StatusCode;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the warden pipeline
///
/// Client-facing variants map onto a fixed HTTP status and a short,
/// generic message. Anything else is treated as a stage fault and
/// downgraded to a 500 by the executor.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("SQL pattern detected in field '{field}'")]
    SqlPatternDetected { field: String },

    #[error("Stage '{stage}' failed: {message}")]
    InternalStageFault { stage: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimitExceeded(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn sql_pattern(field: impl Into<String>) -> Self {
        Self::SqlPatternDetected {
            field: field.into(),
        }
    }

    pub fn stage_fault(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InternalStageFault {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::RateLimitExceeded(_) => "E_RATE_LIMIT",
            Error::CsrfMismatch => "E_CSRF",
            Error::Unauthenticated(_) => "E_AUTH",
            Error::Unauthorized(_) => "E_AUTHZ",
            Error::InvalidInput(_) => "E_INVALID_INPUT",
            Error::SqlPatternDetected { .. } => "E_SQL_PATTERN",
            Error::PayloadTooLarge { .. } => "E_PAYLOAD_TOO_LARGE",
            Error::InternalStageFault { .. } => "E_STAGE_FAULT",
            Error::Config(_) => "E_CONFIG",
            Error::Internal(_) => "E_INTERNAL",
            Error::Http(_) => "E_HTTP",
            Error::Json(_) => "E_JSON",
            Error::Toml(_) => "E_TOML",
            Error::Io(_) => "E_IO",
        }
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) | Error::SqlPatternDetected { .. } => 400,
            Error::Unauthenticated(_) => 401,
            Error::Unauthorized(_) => 403,
            Error::PayloadTooLarge { .. } => 413,
            Error::CsrfMismatch => 419,
            Error::RateLimitExceeded(_) => 429,
            _ => 500,
        }
    }

    /// Human-readable message safe to show to a client.
    ///
    /// Never includes detection internals or fault details.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::RateLimitExceeded(_) => "Too Many Attempts.",
            Error::CsrfMismatch => "CSRF token mismatch.",
            Error::Unauthenticated(_) => "Unauthenticated.",
            Error::Unauthorized(_) => "This action is unauthorized.",
            Error::InvalidInput(_) => "The given data was invalid.",
            Error::SqlPatternDetected { .. } => "Request blocked due to SQL patterns.",
            Error::PayloadTooLarge { .. } => "Payload Too Large.",
            _ => "Server Error",
        }
    }

    /// Render the structured JSON response for this error
    pub fn to_response(&self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Response::json_value(
            status,
            json!({ "message": self.public_message() }),
        )
    }
}
