// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler trigger authentication middleware.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the shared trigger secret.
pub const TASK_TOKEN_HEADER: &str = "x-task-token";

/// Require the configured shared token for `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.config.tasks_token.as_bytes();
    let provided = request
        .headers()
        .get(TASK_TOKEN_HEADER)
        .map(|h| h.as_bytes())
        .unwrap_or_default();

    let valid = !expected.is_empty() && bool::from(provided.ct_eq(expected));
    if !valid {
        tracing::warn!(
            path = %request.uri().path(),
            has_header = !provided.is_empty(),
            "Blocked tasks request with invalid token"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
