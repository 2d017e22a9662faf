//! API error handling.
//!
//! Every failure leaves the service as a JSON body with a stable `code`, a
//! human-readable `message` and optional `details`. Messages never carry
//! filesystem paths; internal failures are logged and reported generically.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{Error, ProcessingError};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message)
    }

    pub fn too_many_requests(retry_after: u64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded",
        )
        .with_details(serde_json::json!({ "retry_after": retry_after }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { field, message } => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Invalid `{field}`: {message}"),
            )
            .with_details(serde_json::json!({ "field": field })),
            Error::Unauthorized => {
                Self::unauthorized("Missing API key. Include 'X-API-Key' header.")
            }
            Error::Forbidden => Self::forbidden("Invalid API key"),
            Error::QuotaExceeded { retry_after } => Self::too_many_requests(retry_after),
            Error::NotFound(what) => Self::not_found(format!("{what} not found or expired")),
            Error::PayloadTooLarge { limit } => Self::payload_too_large(format!(
                "Upload exceeds the {} MB limit",
                limit.div_ceil(1024 * 1024)
            )),
            Error::Processing(e) => {
                let message = match &e {
                    ProcessingError::EngineMissing => "Media engine is not available".to_string(),
                    ProcessingError::NonZeroExit { message, .. } => {
                        format!("Media processing failed: {message}")
                    }
                    ProcessingError::TimedOut { after } => {
                        format!("Media processing timed out after {}s", after.as_secs())
                    }
                };
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_ERROR", message)
            }
            Error::Storage(msg) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", msg)
            }
            Error::Io { op, source, .. } => {
                tracing::error!(op, error = %source, "IO error");
                Self::internal("An internal error occurred")
            }
            other => {
                tracing::error!(error = %other, "Unexpected error");
                Self::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
