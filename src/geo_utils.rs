// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Great-circle helpers.

use geo::Point;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Earth radius used for every distance in the service (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Coordinates {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `geo` point (x = longitude, y = latitude).
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

impl From<Point<f64>> for Coordinates {
    fn from(point: Point<f64>) -> Self {
        Self::new(point.y(), point.x())
    }
}

/// Haversine distance between two points in meters.
pub fn haversine_distance_m(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let dlat = (b.y() - a.y()).to_radians();
    let dlon = (b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Point `meters` due north of `origin` along its meridian.
pub fn offset_north(origin: Point<f64>, meters: f64) -> Point<f64> {
    let dlat = (meters / EARTH_RADIUS_M).to_degrees();
    Point::new(origin.x(), origin.y() + dlat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        let p = Point::new(-122.08, 37.39);
        assert_eq!(haversine_distance_m(p, p), 0.0);
    }

    #[test]
    fn meridian_offset_matches_haversine() {
        let origin = Point::new(0.0, 0.0);
        for meters in [1.0, 999.0, 1000.0, 1001.0, 25_000.0] {
            let moved = offset_north(origin, meters);
            let distance = haversine_distance_m(origin, moved);
            assert!(
                (distance - meters).abs() < 1e-6,
                "expected {meters}, got {distance}"
            );
        }
    }

    #[test]
    fn known_city_distance() {
        // San Francisco to Los Angeles is roughly 559 km.
        let sf = Coordinates::new(37.7749, -122.4194).point();
        let la = Coordinates::new(34.0522, -118.2437).point();
        let km = haversine_distance_m(sf, la) / 1000.0;
        assert!((km - 559.0).abs() < 5.0, "got {km}");
    }

    #[test]
    fn coordinates_round_trip_through_point() {
        let coords = Coordinates::new(37.39, -122.08);
        assert_eq!(Coordinates::from(coords.point()), coords);
    }
}
