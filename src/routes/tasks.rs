// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler trigger routes.
//!
//! These endpoints are called by an external scheduler, not by devices.
//! They are protected by the shared-token middleware in routes/mod.rs.

use crate::error::Result;
use crate::models::SweepSummary;
use crate::services::assignment::ForceExpireResult;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/check-expired", post(check_expired))
        .route("/tasks/orders/{id}/force-expire", post(force_expire))
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// `false` when another sweep was already running.
    pub ran: bool,
    pub summary: Option<SweepSummary>,
}

/// Run one expiration sweep.
async fn check_expired(State(state): State<Arc<AppState>>) -> Json<SweepResponse> {
    let summary = state.sweeper.try_sweep().await;
    Json(SweepResponse {
        ran: summary.is_some(),
        summary,
    })
}

async fn force_expire(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<ForceExpireResult>> {
    Ok(Json(state.assignments.force_expire(&order_id).await?))
}
