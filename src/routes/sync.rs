// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Operator view and controls for the mutation sync queue.

use crate::error::{AppError, Result};
use crate::models::{FlushMode, FlushReport, SyncOperation, SyncStatus};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/status", get(get_status))
        .route("/sync/operations", get(list_operations))
        .route("/sync/operations/{id}", delete(cancel_operation))
        .route("/sync/flush", post(flush_now))
        .route("/sync/connectivity", put(set_connectivity))
        .route("/sync/pause", post(pause))
        .route("/sync/resume", post(resume))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.sync_queue.status())
}

async fn list_operations(State(state): State<Arc<AppState>>) -> Json<Vec<SyncOperation>> {
    Json(state.sync_queue.pending())
}

async fn cancel_operation(
    State(state): State<Arc<AppState>>,
    Path(op_id): Path<String>,
) -> Result<StatusCode> {
    if state.sync_queue.cancel(&op_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("sync operation {op_id}")))
    }
}

async fn flush_now(State(state): State<Arc<AppState>>) -> Json<FlushReport> {
    Json(state.sync_queue.flush(FlushMode::Immediate).await)
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectivityResponse {
    pub online: bool,
    /// Present when going online triggered a flush.
    pub flush: Option<FlushReport>,
}

async fn set_connectivity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectivityRequest>,
) -> Json<ConnectivityResponse> {
    let flush = state.sync_queue.set_online(request.online).await;
    Json(ConnectivityResponse {
        online: request.online,
        flush,
    })
}

async fn pause(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    state.sync_queue.pause();
    Json(state.sync_queue.status())
}

async fn resume(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    state.sync_queue.resume();
    Json(state.sync_queue.status())
}
