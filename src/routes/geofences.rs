// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geofence region registration.

use crate::error::{AppError, Result};
use crate::models::GeofenceRegion;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/geofences", get(list_regions).post(add_region))
        .route("/geofences/{id}", delete(remove_region))
}

async fn list_regions(State(state): State<Arc<AppState>>) -> Json<Vec<GeofenceRegion>> {
    Json(
        state
            .geofences
            .regions()
            .iter()
            .map(|region| region.as_ref().clone())
            .collect(),
    )
}

async fn add_region(
    State(state): State<Arc<AppState>>,
    Json(region): Json<GeofenceRegion>,
) -> Result<(StatusCode, Json<GeofenceRegion>)> {
    state.geofences.add_region(region.clone())?;
    tracing::info!(region_id = %region.id, radius_m = region.radius_m, "Geofence added");
    Ok((StatusCode::CREATED, Json(region)))
}

async fn remove_region(
    State(state): State<Arc<AppState>>,
    Path(region_id): Path<String>,
) -> Result<StatusCode> {
    if state.geofences.remove_region(&region_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("geofence {region_id}")))
    }
}
