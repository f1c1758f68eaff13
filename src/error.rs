//! Application error taxonomy
//!
//! Every internal component raises a typed [`AppError`]; the HTTP edge
//! converts it into the standard `{success: false, error}` JSON envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::http::types::ApiResponse;

/// Unified error type for the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request body, missing URL, bad engine, etc.
    #[error("{0}")]
    Validation(String),

    /// Unknown or expired job.
    #[error("{0}")]
    NotFound(String),

    /// Operation not valid for the current job state.
    #[error("{0}")]
    Conflict(String),

    /// The rate limiter denied the request.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds until the client's window resets.
        retry_after: u64,
    },

    /// The requested browser engine is not configured.
    #[error("{0}")]
    EngineUnavailable(String),

    /// The per-attempt deadline was exceeded. Retriable.
    #[error("{0}")]
    Timeout(String),

    /// Navigation, script, or browser connection failure. Retriable.
    #[error("{0}")]
    Browser(String),

    /// Queue publish/fetch/ack failure.
    #[error("{0}")]
    Broker(String),

    /// Unexpected internal failure.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the dispatcher should retry the attempt that produced this
    /// error (assuming the job has retries left).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Browser(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::EngineUnavailable(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) | AppError::Browser(_) | AppError::Broker(_) => {
                tracing::error!(error = %self, "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response();

        if let AppError::RateLimited { retry_after } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("i/o error: {err}"))
    }
}
