// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP surface: status codes, payload validation and error bodies.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::create_test_app;

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&body).unwrap())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn health_check_reports_ok() {
    let app = create_test_app();
    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn location_round_trip() {
    let app = create_test_app();

    let (status, body) = send(&app.router, "GET", "/entities/d1/location", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "location_unavailable");

    let sample = json!({
        "latitude": 37.7749,
        "longitude": -122.4194,
        "accuracy_meters": 8.0,
        "captured_at": "2026-01-01T12:00:00.000Z"
    });
    let (status, body) = send(&app.router, "POST", "/entities/d1/locations", Some(sample)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fix_source"], "gps");
    assert_eq!(body["freshness"], "fresh");

    let (status, body) = send(&app.router, "GET", "/entities/d1/location", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sample"]["latitude"], 37.7749);
}

#[tokio::test]
async fn invalid_sample_is_bad_request() {
    let app = create_test_app();
    let sample = json!({
        "latitude": 137.0,
        "longitude": 0.0,
        "captured_at": "2026-01-01T12:00:00.000Z"
    });
    let (status, body) = send(&app.router, "POST", "/entities/d1/locations", Some(sample)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn geofence_radius_must_be_positive() {
    let app = create_test_app();
    let region = json!({"id": "depot", "center_lat": 37.0, "center_lng": -122.0, "radius_m": 0.0});
    let (status, _) = send(&app.router, "POST", "/geofences", Some(region)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let region = json!({"id": "depot", "center_lat": 37.0, "center_lng": -122.0, "radius_m": 150.0});
    let (status, body) = send(&app.router, "POST", "/geofences", Some(region)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["notify_on_enter"], true);
    assert_eq!(body["notify_on_dwell"], false);

    let (status, _) = send(&app.router, "DELETE", "/geofences/depot", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app.router, "DELETE", "/geofences/depot", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dispatch_accept_and_conflicts() {
    let app = create_test_app();
    let request = json!({
        "pickup": {"latitude": 37.7749, "longitude": -122.4194},
        "candidates": [
            {"id": "c1", "location": {"latitude": 37.7760, "longitude": -122.4194}, "rating": 4.5},
            {"id": "c2", "location": {"latitude": 37.8000, "longitude": -122.4194}, "rating": 4.9}
        ]
    });
    let (status, offer) = send(&app.router, "POST", "/orders/o1/dispatch", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(offer["candidate_id"], "c1");
    assert_eq!(offer["status"], "pending");

    let (status, body) = send(&app.router, "POST", "/orders/o1/dispatch", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let offer_id = offer["id"].as_str().unwrap().to_string();
    let (status, accepted) = send(&app.router, "POST", &format!("/offers/{offer_id}/accept"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let (status, _) = send(&app.router, "POST", &format!("/offers/{offer_id}/reject"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, order) = send(&app.router, "GET", "/orders/o1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["order"]["status"], "assigned");
    assert_eq!(order["candidates"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn dispatch_without_candidates_conflicts() {
    let app = create_test_app();
    let request = json!({"pickup": null, "candidates": []});
    let (status, body) = send(&app.router, "POST", "/orders/o1/dispatch", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "no_candidate_available");
}

#[tokio::test]
async fn dispatch_with_dropoff_registers_delivery_zone() {
    let app = create_test_app();
    let request = json!({
        "pickup": {"latitude": 37.7749, "longitude": -122.4194},
        "dropoff": {"latitude": 37.7849, "longitude": -122.4094},
        "candidates": [{"id": "c1", "rating": 4.0}]
    });
    let (status, _) = send(&app.router, "POST", "/orders/o1/dispatch", Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, order) = send(&app.router, "GET", "/orders/o1", None).await;
    assert_eq!(order["order"]["dropoff"]["latitude"], 37.7849);
    let ids: Vec<_> = app
        .state
        .geofences
        .regions()
        .iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, ["order-o1-delivery", "order-o1-pickup"]);

    let bad = json!({
        "dropoff": {"latitude": 123.0, "longitude": 0.0},
        "candidates": [{"id": "c1"}]
    });
    let (status, _) = send(&app.router, "POST", "/orders/o2/dispatch", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reject_with_reason_cascades() {
    let app = create_test_app();
    let request = json!({
        "pickup": {"latitude": 37.7749, "longitude": -122.4194},
        "candidates": [
            {"id": "c1", "location": {"latitude": 37.7750, "longitude": -122.4194}},
            {"id": "c2", "location": {"latitude": 37.7900, "longitude": -122.4194}}
        ]
    });
    let (_, offer) = send(&app.router, "POST", "/orders/o1/dispatch", Some(request)).await;
    let offer_id = offer["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/offers/{offer_id}/reject"),
        Some(json!({"reason": "busy"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["offer"]["status"], "rejected");
    assert_eq!(body["next"]["outcome"], "offered");
    assert_eq!(body["next"]["offer"]["candidate_id"], "c2");
}

#[tokio::test]
async fn sync_controls() {
    let app = create_test_app();

    let (status, body) = send(&app.router, "PUT", "/sync/connectivity", Some(json!({"online": false}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["online"], false);
    assert!(body["flush"].is_null());

    let sample = json!({"latitude": 37.0, "longitude": -122.0, "captured_at": "2026-01-01T12:00:00.000Z"});
    send(&app.router, "POST", "/entities/d1/locations", Some(sample)).await;

    let (_, status_body) = send(&app.router, "GET", "/sync/status", None).await;
    let pending = status_body["pending"].as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["table_name"], "location_samples");

    let (_, flush) = send(&app.router, "POST", "/sync/flush", None).await;
    assert_eq!(flush["skipped"], "offline");

    let (_, body) = send(&app.router, "PUT", "/sync/connectivity", Some(json!({"online": true}))).await;
    assert_eq!(body["flush"]["applied"], 1);

    let (status, _) = send(&app.router, "DELETE", "/sync/operations/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signals_update_plan() {
    let app = create_test_app();
    let sample = json!({"latitude": 37.0, "longitude": -122.0, "captured_at": "2026-01-01T12:00:00.000Z"});
    send(&app.router, "POST", "/entities/d1/locations", Some(sample)).await;

    let (status, plan) = send(
        &app.router,
        "PUT",
        "/entities/d1/signals",
        Some(json!({"battery": {"level": 0.03, "charging": false}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["accuracy_tier"], "passive");

    let (status, _) = send(
        &app.router,
        "PUT",
        "/entities/d1/signals",
        Some(json!({"battery": {"level": 3.0, "charging": false}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app.router, "DELETE", "/entities/d1/tracking", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], false);
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = create_test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
    assert_eq!(response.headers().get("X-Frame-Options").unwrap(), "DENY");
}
