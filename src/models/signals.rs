// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device battery and network readings.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::location::{LocationSample, NetworkType};

/// Battery at or below this level counts as low.
pub const LOW_BATTERY_THRESHOLD: f64 = 0.15;
/// Battery at or below this level counts as critical.
pub const CRITICAL_BATTERY_THRESHOLD: f64 = 0.05;

/// Battery reading. `level` is a fraction in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct BatteryState {
    #[validate(range(min = 0.0, max = 1.0))]
    pub level: f64,
    pub charging: bool,
    #[serde(default)]
    pub low_power_mode: bool,
}

impl BatteryState {
    /// Low or critical, not charging, or the OS asked us to save power.
    pub fn is_constrained(&self) -> bool {
        (!self.charging && self.level <= LOW_BATTERY_THRESHOLD) || self.low_power_mode
    }

    pub fn is_critical(&self) -> bool {
        !self.charging && self.level <= CRITICAL_BATTERY_THRESHOLD
    }
}

/// Connectivity quality as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl NetworkQuality {
    pub fn is_degraded(&self) -> bool {
        matches!(self, NetworkQuality::Poor | NetworkQuality::Offline)
    }
}

/// Network reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub network_type: NetworkType,
    pub quality: NetworkQuality,
}

/// What the sampling controller knows about the device right now.
///
/// A `None` reading means the signal could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReadings {
    pub battery: Option<BatteryState>,
    pub network: Option<NetworkState>,
}

impl SignalReadings {
    pub fn new(battery: BatteryState, network: NetworkState) -> Self {
        Self {
            battery: Some(battery),
            network: Some(network),
        }
    }

    /// Fill unavailable readings from what the sample itself carried.
    pub fn with_sample_fallback(mut self, sample: &LocationSample) -> Self {
        if self.battery.is_none() {
            self.battery = sample.battery_level.map(|level| BatteryState {
                level,
                charging: false,
                low_power_mode: false,
            });
        }
        if self.network.is_none() {
            self.network = sample.network_type.map(|network_type| NetworkState {
                quality: match network_type {
                    NetworkType::None => NetworkQuality::Offline,
                    _ => NetworkQuality::Good,
                },
                network_type,
            });
        }
        self
    }
}
