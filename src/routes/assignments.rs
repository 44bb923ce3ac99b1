// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Order dispatch and offer responses.

use crate::error::Result;
use crate::geo_utils::Coordinates;
use crate::models::{AssignmentOffer, Candidate, Order, OrderCandidate};
use crate::services::assignment::RejectResult;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/dispatch", post(dispatch_order))
        .route("/offers/{id}/accept", post(accept_offer))
        .route("/offers/{id}/reject", post(reject_offer))
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub pickup: Option<Coordinates>,
    #[serde(default)]
    pub dropoff: Option<Coordinates>,
    pub candidates: Vec<Candidate>,
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<AssignmentOffer>)> {
    for point in request.pickup.iter().chain(request.dropoff.iter()) {
        point.validate()?;
    }
    let offer = state
        .assignments
        .dispatch_with_dropoff(&order_id, request.pickup, request.dropoff, &request.candidates)
        .await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub offers: Vec<AssignmentOffer>,
    pub candidates: Vec<OrderCandidate>,
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>> {
    let order = state.assignments.order(&order_id).await?;
    let offers = state.assignments.offers_for_order(&order_id).await?;
    let candidates = state.assignments.candidates_for_order(&order_id).await?;
    Ok(Json(OrderResponse {
        order,
        offers,
        candidates,
    }))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
) -> Result<Json<AssignmentOffer>> {
    Ok(Json(state.assignments.accept(&offer_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

async fn reject_offer(
    State(state): State<Arc<AppState>>,
    Path(offer_id): Path<String>,
    request: Option<Json<RejectRequest>>,
) -> Result<Json<RejectResult>> {
    let reason = request.and_then(|Json(r)| r.reason);
    let result = state
        .assignments
        .reject(&offer_id, reason.as_deref())
        .await?;
    Ok(Json(result))
}
