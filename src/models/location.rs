// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Location samples, tracking profiles and published updates.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::geo_utils::{haversine_distance_m, Coordinates};
use crate::models::geofence::GeofenceEvent;

/// Samples with a reported accuracy below this are treated as GPS fixes.
pub const GPS_ACCURACY_THRESHOLD_M: f64 = 50.0;

/// Network bearer reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    Unknown,
}

/// A single position reading. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LocationSample {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub accuracy_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 360.0))]
    pub heading: Option<f64>,
    /// Ground speed in m/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub speed: Option<f64>,
    /// Battery fraction in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<NetworkType>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            heading: None,
            speed: None,
            battery_level: None,
            network_type: None,
            captured_at,
        }
    }

    pub fn at(coords: Coordinates, captured_at: DateTime<Utc>) -> Self {
        Self::new(coords.latitude, coords.longitude, captured_at)
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn distance_to(&self, other: &LocationSample) -> f64 {
        haversine_distance_m(self.point(), other.point())
    }

    pub fn fix_source(&self) -> FixSource {
        match self.accuracy_meters {
            Some(accuracy) if accuracy < GPS_ACCURACY_THRESHOLD_M => FixSource::Gps,
            Some(_) => FixSource::Network,
            None => FixSource::Unknown,
        }
    }
}

/// Where a fix most likely came from, judged by its accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    Gps,
    Network,
    Unknown,
}

/// Desired location accuracy, from most to least power hungry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    High,
    Balanced,
    Low,
    Passive,
}

impl AccuracyTier {
    /// Upper bound of the poll interval for this tier.
    pub fn max_interval_ms(&self) -> u64 {
        match self {
            AccuracyTier::High => 9_000,
            AccuracyTier::Balanced => 30_000,
            AccuracyTier::Low => 60_000,
            AccuracyTier::Passive => 300_000,
        }
    }
}

impl std::fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccuracyTier::High => "high",
            AccuracyTier::Balanced => "balanced",
            AccuracyTier::Low => "low",
            AccuracyTier::Passive => "passive",
        };
        f.write_str(name)
    }
}

/// When and how precisely to read the next location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPlan {
    pub interval_ms: u64,
    pub movement_filter_m: f64,
    pub accuracy_tier: AccuracyTier,
}

/// Derived confidence in a sample's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Per-entity sampling state, mutated after every sample and signal read.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingProfile {
    pub entity_id: String,
    pub current_interval_ms: u64,
    pub movement_filter_m: f64,
    pub accuracy_tier: AccuracyTier,
    pub last_sample: Option<LocationSample>,
    pub is_moving: bool,
    pub is_background: bool,
    pub destination: Option<Coordinates>,
}

impl TrackingProfile {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            current_interval_ms: 15_000,
            movement_filter_m: 10.0,
            accuracy_tier: AccuracyTier::Balanced,
            last_sample: None,
            is_moving: false,
            is_background: false,
            destination: None,
        }
    }

    /// Distance from the last sample to the destination, when both are known.
    pub fn distance_to_destination_m(&self) -> Option<f64> {
        let sample = self.last_sample.as_ref()?;
        let destination = self.destination?;
        Some(haversine_distance_m(sample.point(), destination.point()))
    }

    pub fn current_plan(&self) -> PollPlan {
        PollPlan {
            interval_ms: self.current_interval_ms,
            movement_filter_m: self.movement_filter_m,
            accuracy_tier: self.accuracy_tier,
        }
    }
}

/// What subscribers receive for every ingested sample.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedUpdate {
    pub entity_id: String,
    pub sample: LocationSample,
    pub freshness: Freshness,
    pub fix_source: FixSource,
    pub is_moving: bool,
    pub plan: PollPlan,
    pub geofence_events: Vec<GeofenceEvent>,
}

/// Latest known position of an entity.
#[derive(Debug, Clone, Serialize)]
pub struct LocationFix {
    pub entity_id: String,
    pub sample: LocationSample,
    pub freshness: Freshness,
    pub age_secs: i64,
}
