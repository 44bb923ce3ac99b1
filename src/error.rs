// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Transient conditions (`SignalUnavailable`, `WriteFailed`, `Database`) are
//! absorbed and retried by the component that hit them. Only terminal
//! conditions (`RetryExhausted`, `NoCandidateAvailable`) are expected to reach
//! callers, plus `NoLocation` for entities that never reported a position.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Signal unavailable: {0}")]
    SignalUnavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Operation {operation_id} dropped after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("No candidate available for order {0}")]
    NoCandidateAvailable(String),

    #[error("No location received for entity {0}")]
    NoLocation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the failure is worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::SignalUnavailable(_) | AppError::WriteFailed(_) | AppError::Database(_)
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(anyhow::anyhow!("JSON error: {}", err))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::SignalUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "signal_unavailable",
                Some(msg.clone()),
            ),
            AppError::WriteFailed(msg) => {
                tracing::warn!(error = %msg, "Write failed");
                (StatusCode::SERVICE_UNAVAILABLE, "write_failed", None)
            }
            AppError::RetryExhausted { operation_id, .. } => {
                tracing::error!(operation_id = %operation_id, error = %self, "Retry exhausted");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "retry_exhausted",
                    Some(operation_id.clone()),
                )
            }
            AppError::NoCandidateAvailable(order_id) => (
                StatusCode::CONFLICT,
                "no_candidate_available",
                Some(order_id.clone()),
            ),
            AppError::NoLocation(entity_id) => (
                StatusCode::NOT_FOUND,
                "location_unavailable",
                Some(entity_id.clone()),
            ),
            AppError::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, "invalid_transition", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type Result<T> = std::result::Result<T, AppError>;
