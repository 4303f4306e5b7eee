//! # Error Handling
//!
//! Custom error types for the gateway and their conversion into HTTP responses.
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **NotFound**: Requested resource doesn't exist (404 errors)
//! - **ConfigError**: Configuration problems (500 errors)
//! - **ValidationError**: Data validation failed (400 errors)
//! - **Upstream**: The hosted voice agent or text-generation API failed (502 errors)
//! - **RateLimited**: The upstream API refused the call with a quota error (429 errors)
//!
//! `Upstream` and `RateLimited` are kept apart deliberately: the evaluation
//! retry flow shows the user different guidance for a quota error than for a
//! generic upstream failure, so the distinction must survive all the way to
//! the HTTP/WebSocket surface.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-level error type used across handlers and session code.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (task failures, poisoned state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The remote agent or generation API returned a failure
    Upstream(String),

    /// The upstream API rejected the call due to rate limiting
    RateLimited(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
        }
    }
}

impl AppError {
    /// Whether the operation that produced this error is worth retrying
    /// without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Upstream(_) | AppError::RateLimited(_))
    }
}

/// Converts errors into the JSON error envelope all endpoints share:
///
/// ```json
/// {
///   "error": {
///     "type": "rate_limited",
///     "message": "evaluation quota exhausted",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::Upstream(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "upstream_error",
                msg.clone(),
            ),
            AppError::RateLimited(msg) => (
                actix_web::http::StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are almost always malformed client input,
/// so they map to 400, not 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Transport-level failures talking to the hosted APIs. A response that
/// carried HTTP 429 is classified as `RateLimited` so the evaluation retry
/// surface can tell quota exhaustion apart from a flaky upstream.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            AppError::RateLimited(err.to_string())
        } else {
            AppError::Upstream(err.to_string())
        }
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Upstream("agent down".to_string()).is_retryable());
        assert!(AppError::RateLimited("quota".to_string()).is_retryable());
        assert!(!AppError::BadRequest("bad".to_string()).is_retryable());
        assert!(!AppError::NotFound("missing".to_string()).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = AppError::RateLimited("evaluation quota exhausted".to_string());
        assert_eq!(err.to_string(), "Rate limited: evaluation quota exhausted");
    }
}
