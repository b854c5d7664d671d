use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid rate configuration: {0}")]
    InvalidRate(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Redis command error: {0}")]
    CommandError(String),

    #[error("Script execution error: {0}")]
    ScriptError(String),

    #[error("Config decoding error: {0}")]
    ConfigDecode(String),

    #[error("File system error: {0}")]
    FileSystemError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RateLimitError {
    /// Label used for the error metric, so store outages and script faults
    /// stay distinguishable on dashboards.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            RateLimitError::ConfigurationError(_) => "configuration",
            RateLimitError::InvalidKey(_) | RateLimitError::InvalidRate(_) => "validation",
            RateLimitError::StoreUnavailable(_) => "store_unavailable",
            RateLimitError::CommandError(_) => "command",
            RateLimitError::ScriptError(_) => "script_error",
            RateLimitError::ConfigDecode(_) => "config_decode",
            RateLimitError::FileSystemError(_) => "filesystem",
            RateLimitError::JsonError(_) => "json",
            RateLimitError::InternalError(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            RateLimitError::ConfigurationError(_)
            | RateLimitError::InvalidKey(_)
            | RateLimitError::InvalidRate(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            RateLimitError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            RateLimitError::CommandError(_)
            | RateLimitError::ScriptError(_)
            | RateLimitError::ConfigDecode(_)
            | RateLimitError::FileSystemError(_)
            | RateLimitError::JsonError(_)
            | RateLimitError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;
