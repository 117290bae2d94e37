use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::limiter::RateLimitError;
use crate::models::ErrorDetail;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Rate-limit rejections are not errors; the middleware answers them
/// directly. These variants cover startup misconfiguration and the rare
/// internal fault a handler might surface.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid rate limit configuration: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Unexpected fault inside a handler. The message is logged, never sent.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full details stay in the server log; clients get a generic message.
        tracing::error!(error = %self, "Request failed");

        let (status, detail) = match &self {
            AppError::ConfigError(_) | AppError::RateLimit(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Service configuration error",
            ),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };

        (status, axum::Json(ErrorDetail::new(detail))).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
