// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Battery and network signal sources.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::models::{BatteryState, NetworkState, SignalReadings};

/// Reads device signals for a tracked entity.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn battery_state(&self, entity_id: &str) -> Result<BatteryState>;
    async fn network_state(&self, entity_id: &str) -> Result<NetworkState>;
}

/// Signals pushed by devices over the API, held until replaced.
#[derive(Default)]
pub struct ReportedSignals {
    battery: DashMap<String, BatteryState>,
    network: DashMap<String, NetworkState>,
}

impl ReportedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_battery(&self, entity_id: &str, state: BatteryState) {
        self.battery.insert(entity_id.to_string(), state);
    }

    pub fn set_network(&self, entity_id: &str, state: NetworkState) {
        self.network.insert(entity_id.to_string(), state);
    }

    pub fn clear(&self, entity_id: &str) {
        self.battery.remove(entity_id);
        self.network.remove(entity_id);
    }
}

#[async_trait]
impl SignalProvider for ReportedSignals {
    async fn battery_state(&self, entity_id: &str) -> Result<BatteryState> {
        self.battery
            .get(entity_id)
            .map(|state| *state)
            .ok_or_else(|| AppError::SignalUnavailable(format!("battery for {entity_id}")))
    }

    async fn network_state(&self, entity_id: &str) -> Result<NetworkState> {
        self.network
            .get(entity_id)
            .map(|state| *state)
            .ok_or_else(|| AppError::SignalUnavailable(format!("network for {entity_id}")))
    }
}

/// Poll both signals. Failures become `None` so the controller can degrade.
pub async fn read_signals(provider: &dyn SignalProvider, entity_id: &str) -> SignalReadings {
    let battery = match provider.battery_state(entity_id).await {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::debug!(entity_id, error = %e, "Battery state unavailable");
            None
        }
    };
    let network = match provider.network_state(entity_id).await {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::debug!(entity_id, error = %e, "Network state unavailable");
            None
        }
    };
    SignalReadings { battery, network }
}
