/// Unified error types for the Breakwater risk engine
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., a second open appeal for the same action)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Policy contract violations. These indicate a caller bug, such as
    /// trying to auto-create a permanent ban, and must never be downgraded.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert EngineError to HTTP response
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            EngineError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            EngineError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            EngineError::Conflict(_) => (
                StatusCode::CONFLICT,
                "Conflict",
                self.to_string(),
            ),
            EngineError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            EngineError::PolicyViolation(_) => {
                tracing::error!("policy violation surfaced to caller: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PolicyViolation",
                    self.to_string(),
                )
            }
            EngineError::Database(_)
            | EngineError::Internal(_)
            | EngineError::Io(_)
            | EngineError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
            EngineError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            crate::metrics::record_error(error_code, "api");
        }

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
