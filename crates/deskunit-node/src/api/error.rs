//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SubmitError;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - The control loop cannot take the work.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<serde_json::Value>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "inbox_full",
    "message": "control loop inbox is full (32 items)",
    "details": {"capacity": 32}
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_topic").
    #[schema(example = "invalid_topic")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Topic must not be empty")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => {
                tracing::warn!(error_code = %error_code, message = %message, "Rejecting request");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details,
                    },
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::InboxFull { capacity } => Self::ServiceUnavailable {
                error_code: "inbox_full".to_string(),
                message: err.to_string(),
                details: Some(serde_json::json!({ "capacity": capacity })),
            },
            SubmitError::LoopStopped => Self::ServiceUnavailable {
                error_code: "loop_stopped".to_string(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}
