// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Adaptive location sampling.
//!
//! Picks the next poll interval, movement filter and accuracy tier from the
//! entity's motion, its distance to the destination and the device's battery
//! and network state. Rules are checked in this order:
//!
//! 1. no sample yet: `balanced`
//! 2. near the destination: `high`, whatever the battery says
//! 3. battery unreadable, critical or low: `passive` / `low`, filter doubled
//! 4. backgrounded and stationary: `passive`
//! 5. speed, widened by poor or missing connectivity

use crate::models::{
    AccuracyTier, LocationSample, NetworkQuality, PollPlan, SignalReadings, TrackingProfile,
};

/// Tunables for [`AdaptiveSamplingController`].
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Closer than this to the destination switches to `high`.
    pub near_arrival_m: f64,
    /// Speed above which a sample counts as moving (m/s).
    pub moving_speed_mps: f64,
    /// Displacement above which a sample counts as moving (m).
    pub moving_distance_m: f64,
    /// Speed treated as fast travel (m/s).
    pub fast_speed_mps: f64,
    pub base_filter_m: f64,
    pub initial_interval_ms: u64,
    pub near_arrival_interval_ms: u64,
    pub fast_interval_ms: u64,
    pub moving_interval_ms: u64,
    pub stationary_interval_ms: u64,
    pub low_battery_interval_ms: u64,
    pub passive_interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            near_arrival_m: 300.0,
            moving_speed_mps: 0.5,
            moving_distance_m: 10.0,
            fast_speed_mps: 5.0,
            base_filter_m: 10.0,
            initial_interval_ms: 15_000,
            near_arrival_interval_ms: 5_000,
            fast_interval_ms: 10_000,
            moving_interval_ms: 20_000,
            stationary_interval_ms: 45_000,
            low_battery_interval_ms: 60_000,
            passive_interval_ms: 120_000,
        }
    }
}

const KMH_20: f64 = 20.0 / 3.6;
const KMH_50: f64 = 50.0 / 3.6;

/// Computes [`PollPlan`]s and keeps the tracking profile in step with them.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveSamplingController {
    config: SamplingConfig,
}

impl AdaptiveSamplingController {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Whether `next` shows movement relative to `prev`.
    pub fn detect_movement(&self, prev: Option<&LocationSample>, next: &LocationSample) -> bool {
        if next.speed.is_some_and(|s| s > self.config.moving_speed_mps) {
            return true;
        }
        prev.is_some_and(|prev| prev.distance_to(next) > self.config.moving_distance_m)
    }

    /// Record a new sample on the profile.
    pub fn observe(&self, profile: &mut TrackingProfile, sample: &LocationSample) {
        profile.is_moving = self.detect_movement(profile.last_sample.as_ref(), sample);
        profile.last_sample = Some(sample.clone());
    }

    /// Compute the next plan and store it on the profile.
    pub fn next_poll_plan(&self, profile: &mut TrackingProfile, signals: &SignalReadings) -> PollPlan {
        let plan = self.plan_for(profile, signals);
        profile.current_interval_ms = plan.interval_ms;
        profile.movement_filter_m = plan.movement_filter_m;
        profile.accuracy_tier = plan.accuracy_tier;
        plan
    }

    fn plan_for(&self, profile: &TrackingProfile, signals: &SignalReadings) -> PollPlan {
        let cfg = &self.config;

        let Some(sample) = profile.last_sample.as_ref() else {
            return PollPlan {
                interval_ms: cfg.initial_interval_ms,
                movement_filter_m: cfg.base_filter_m,
                accuracy_tier: AccuracyTier::Balanced,
            };
        };

        let filter = self.movement_filter(profile.is_moving, sample.speed);

        if profile
            .distance_to_destination_m()
            .is_some_and(|d| d < cfg.near_arrival_m)
        {
            return PollPlan {
                interval_ms: cfg.near_arrival_interval_ms,
                movement_filter_m: filter,
                accuracy_tier: AccuracyTier::High,
            };
        }

        // An unreadable battery is treated like a critical one.
        match signals.battery {
            Some(battery) if !battery.is_critical() && !battery.is_constrained() => {}
            Some(battery) if !battery.is_critical() => {
                return PollPlan {
                    interval_ms: cfg.low_battery_interval_ms,
                    movement_filter_m: filter * 2.0,
                    accuracy_tier: AccuracyTier::Low,
                }
            }
            _ => {
                return PollPlan {
                    interval_ms: cfg.passive_interval_ms,
                    movement_filter_m: filter * 2.0,
                    accuracy_tier: AccuracyTier::Passive,
                }
            }
        }

        if profile.is_background && !profile.is_moving {
            return PollPlan {
                interval_ms: cfg.passive_interval_ms,
                movement_filter_m: filter,
                accuracy_tier: AccuracyTier::Passive,
            };
        }

        let (interval_ms, accuracy_tier) = if sample.speed.is_some_and(|s| s >= cfg.fast_speed_mps) {
            (cfg.fast_interval_ms, AccuracyTier::Balanced)
        } else if profile.is_moving {
            (cfg.moving_interval_ms, AccuracyTier::Balanced)
        } else {
            (cfg.stationary_interval_ms, AccuracyTier::Low)
        };

        let quality = signals
            .network
            .map(|n| n.quality)
            .unwrap_or(NetworkQuality::Poor);
        let interval_ms = match quality {
            NetworkQuality::Offline => accuracy_tier.max_interval_ms(),
            NetworkQuality::Poor => (interval_ms * 2).min(accuracy_tier.max_interval_ms()),
            NetworkQuality::Good | NetworkQuality::Excellent => interval_ms,
        };

        PollPlan {
            interval_ms,
            movement_filter_m: filter,
            accuracy_tier,
        }
    }

    fn movement_filter(&self, is_moving: bool, speed: Option<f64>) -> f64 {
        let base = self.config.base_filter_m;
        if !is_moving {
            return base * 3.0;
        }
        match speed {
            Some(s) if s > KMH_50 => base * 5.0,
            Some(s) if s > KMH_20 => base * 2.0,
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::{offset_north, Coordinates};
    use crate::models::{BatteryState, NetworkState, NetworkType};
    use chrono::Utc;
    use geo::Point;

    fn battery(level: f64, charging: bool) -> BatteryState {
        BatteryState {
            level,
            charging,
            low_power_mode: false,
        }
    }

    fn network(quality: NetworkQuality) -> NetworkState {
        NetworkState {
            network_type: NetworkType::Cellular,
            quality,
        }
    }

    fn profile_at_distance(meters: f64) -> TrackingProfile {
        let destination = Point::new(-122.0, 37.0);
        let here = offset_north(destination, meters);
        let mut profile = TrackingProfile::new("driver-1");
        profile.destination = Some(Coordinates::from(destination));
        profile.last_sample = Some(LocationSample::at(Coordinates::from(here), Utc::now()));
        profile
    }

    #[test]
    fn no_sample_is_balanced() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = TrackingProfile::new("driver-1");
        let plan = controller.next_poll_plan(&mut profile, &SignalReadings::default());
        assert_eq!(plan.accuracy_tier, AccuracyTier::Balanced);
        assert_eq!(profile.current_interval_ms, plan.interval_ms);
    }

    #[test]
    fn low_battery_far_from_destination_saves_power() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(5_000.0);
        let signals = SignalReadings::new(battery(0.10, false), network(NetworkQuality::Good));

        let plan = controller.next_poll_plan(&mut profile, &signals);
        assert!(matches!(
            plan.accuracy_tier,
            AccuracyTier::Low | AccuracyTier::Passive
        ));
        // Stationary filter (30 m) doubled.
        assert_eq!(plan.movement_filter_m, 60.0);
    }

    #[test]
    fn near_arrival_beats_low_battery() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(50.0);
        let signals = SignalReadings::new(battery(0.10, false), network(NetworkQuality::Good));

        let plan = controller.next_poll_plan(&mut profile, &signals);
        assert_eq!(plan.accuracy_tier, AccuracyTier::High);
        assert!(plan.interval_ms < 10_000);
    }

    #[test]
    fn critical_battery_is_passive() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(5_000.0);
        let signals = SignalReadings::new(battery(0.03, false), network(NetworkQuality::Good));
        let plan = controller.next_poll_plan(&mut profile, &signals);
        assert_eq!(plan.accuracy_tier, AccuracyTier::Passive);
        assert!(plan.interval_ms >= 120_000);
    }

    #[test]
    fn unreadable_battery_degrades_to_passive() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(5_000.0);
        let signals = SignalReadings {
            battery: None,
            network: Some(network(NetworkQuality::Excellent)),
        };
        let plan = controller.next_poll_plan(&mut profile, &signals);
        assert_eq!(plan.accuracy_tier, AccuracyTier::Passive);
    }

    #[test]
    fn poor_network_widens_interval_within_tier() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(5_000.0);
        profile.is_moving = true;

        let good = SignalReadings::new(battery(0.8, false), network(NetworkQuality::Good));
        let poor = SignalReadings::new(battery(0.8, false), network(NetworkQuality::Poor));
        let offline = SignalReadings::new(battery(0.8, false), network(NetworkQuality::Offline));

        let good = controller.next_poll_plan(&mut profile, &good);
        let poor = controller.next_poll_plan(&mut profile, &poor);
        let offline = controller.next_poll_plan(&mut profile, &offline);

        assert_eq!(good.accuracy_tier, AccuracyTier::Balanced);
        assert!(poor.interval_ms > good.interval_ms);
        assert!(poor.interval_ms <= AccuracyTier::Balanced.max_interval_ms());
        assert_eq!(offline.interval_ms, AccuracyTier::Balanced.max_interval_ms());
    }

    #[test]
    fn background_stationary_is_passive() {
        let controller = AdaptiveSamplingController::default();
        let mut profile = profile_at_distance(5_000.0);
        profile.is_background = true;
        let signals = SignalReadings::new(battery(0.9, true), network(NetworkQuality::Excellent));
        let plan = controller.next_poll_plan(&mut profile, &signals);
        assert_eq!(plan.accuracy_tier, AccuracyTier::Passive);
    }

    #[test]
    fn movement_from_speed_or_displacement() {
        let controller = AdaptiveSamplingController::default();
        let origin = Point::new(-122.0, 37.0);
        let prev = LocationSample::at(Coordinates::from(origin), Utc::now());

        let mut still = LocationSample::at(Coordinates::from(offset_north(origin, 5.0)), Utc::now());
        assert!(!controller.detect_movement(Some(&prev), &still));

        still.speed = Some(1.2);
        assert!(controller.detect_movement(Some(&prev), &still));

        let far = LocationSample::at(Coordinates::from(offset_north(origin, 25.0)), Utc::now());
        assert!(controller.detect_movement(Some(&prev), &far));
        assert!(!controller.detect_movement(None, &far));
    }

    #[test]
    fn filter_scales_with_speed() {
        let controller = AdaptiveSamplingController::default();
        assert_eq!(controller.movement_filter(true, Some(3.0)), 10.0);
        assert_eq!(controller.movement_filter(true, Some(8.0)), 20.0);
        assert_eq!(controller.movement_filter(true, Some(20.0)), 50.0);
        assert_eq!(controller.movement_filter(false, None), 30.0);
    }
}
