use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while installing or running the rate limiter.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The rate limit was assembled without something it cannot run without.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The counter store could not be reached or refused the operation.
    #[error("Counter store error: {0}")]
    Store(String),

    /// The counter store answered with something that is not a counter.
    #[error("Malformed counter value for key '{key}': {value}")]
    MalformedCount { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, RateLimitError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &RateLimitError) -> Self {
        match err {
            RateLimitError::Configuration(msg) => Self::new("configuration_error", msg, 500),
            RateLimitError::Store(msg) => Self::new("service_unavailable", msg, 503),
            RateLimitError::MalformedCount { .. } => {
                Self::new("internal_error", &err.to_string(), 500)
            }
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
