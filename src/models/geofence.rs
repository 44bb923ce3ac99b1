// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geofence regions and the events raised for them.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

fn default_true() -> bool {
    true
}

/// A circular region monitored for enter/exit/dwell transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GeofenceRegion {
    pub id: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub center_lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub center_lng: f64,
    /// Must be strictly positive.
    pub radius_m: f64,
    #[serde(default = "default_true")]
    pub notify_on_enter: bool,
    #[serde(default = "default_true")]
    pub notify_on_exit: bool,
    #[serde(default)]
    pub notify_on_dwell: bool,
    #[serde(default)]
    pub dwell_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl GeofenceRegion {
    /// Region notifying on enter and exit only.
    pub fn new(id: impl Into<String>, center_lat: f64, center_lng: f64, radius_m: f64) -> Self {
        Self {
            id: id.into(),
            center_lat,
            center_lng,
            radius_m,
            notify_on_enter: true,
            notify_on_exit: true,
            notify_on_dwell: false,
            dwell_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_dwell(mut self, dwell_ms: u64) -> Self {
        self.notify_on_dwell = true;
        self.dwell_ms = dwell_ms;
        self
    }

    pub fn center(&self) -> Point<f64> {
        Point::new(self.center_lng, self.center_lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceEventKind {
    Enter,
    Exit,
    Dwell,
}

/// A region transition for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub region_id: String,
    pub entity_id: String,
    pub kind: GeofenceEventKind,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Derived inside/outside state of one entity for one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionMembership {
    pub region_id: String,
    pub entity_id: String,
    pub is_inside: bool,
    pub entered_at: Option<DateTime<Utc>>,
    pub dwell_timer_active: bool,
}

/// Errors from region registration.
#[derive(Debug, thiserror::Error)]
pub enum GeofenceError {
    #[error("Region radius must be positive, got {0}")]
    InvalidRadius(f64),

    #[error("Region id must not be empty")]
    MissingId,

    #[error("Invalid region: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl From<GeofenceError> for crate::error::AppError {
    fn from(err: GeofenceError) -> Self {
        crate::error::AppError::BadRequest(err.to_string())
    }
}
