// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Location ingestion and per-entity tracking state.

use crate::error::Result;
use crate::geo_utils::Coordinates;
use crate::models::{
    BatteryState, EnrichedUpdate, LocationFix, LocationSample, NetworkState, PollPlan,
    RegionMembership,
};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/entities/{id}/locations", post(ingest_location))
        .route("/entities/{id}/location", get(get_location))
        .route("/entities/{id}/destination", put(set_destination))
        .route("/entities/{id}/background", put(set_background))
        .route("/entities/{id}/signals", put(set_signals))
        .route("/entities/{id}/geofences", get(get_memberships))
        .route("/entities/{id}/tracking", delete(stop_tracking))
}

async fn ingest_location(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(sample): Json<LocationSample>,
) -> Result<Json<EnrichedUpdate>> {
    let update = state.publisher.ingest(&entity_id, sample).await?;
    Ok(Json(update))
}

async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<LocationFix>> {
    Ok(Json(state.publisher.latest(&entity_id)?))
}

#[derive(Debug, Deserialize)]
pub struct DestinationRequest {
    /// `null` clears the destination.
    pub destination: Option<Coordinates>,
}

async fn set_destination(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(request): Json<DestinationRequest>,
) -> Result<Json<PollPlan>> {
    if let Some(destination) = &request.destination {
        destination.validate()?;
    }
    let plan = state
        .publisher
        .set_destination(&entity_id, request.destination)
        .await;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct BackgroundRequest {
    pub background: bool,
}

async fn set_background(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(request): Json<BackgroundRequest>,
) -> Json<PollPlan> {
    Json(
        state
            .publisher
            .set_background(&entity_id, request.background)
            .await,
    )
}

#[derive(Debug, Deserialize)]
pub struct SignalsRequest {
    pub battery: Option<BatteryState>,
    pub network: Option<NetworkState>,
}

/// Record device-reported battery/network state and return the new plan.
async fn set_signals(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(request): Json<SignalsRequest>,
) -> Result<Json<PollPlan>> {
    if let Some(battery) = request.battery {
        battery.validate()?;
        state.signals.set_battery(&entity_id, battery);
    }
    if let Some(network) = request.network {
        state.signals.set_network(&entity_id, network);
    }
    Ok(Json(state.publisher.refresh_plan(&entity_id).await))
}

async fn get_memberships(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Json<Vec<RegionMembership>> {
    Json(state.geofences.memberships(&entity_id))
}

#[derive(Debug, Serialize)]
pub struct StopTrackingResponse {
    pub entity_id: String,
    pub stopped: bool,
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Json<StopTrackingResponse> {
    let stopped = state.publisher.stop_tracking(&entity_id);
    state.signals.clear(&entity_id);
    Json(StopTrackingResponse { entity_id, stopped })
}
