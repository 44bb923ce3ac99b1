// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Location ingestion and fan-out.
//!
//! Every sample runs through the sampling controller and the geofence
//! monitor, is stamped with a freshness classification and is delivered to
//! the entity's subscribers and then to the global subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::db::{collections, to_row, OpType};
use crate::error::{AppError, Result};
use crate::geo_utils::Coordinates;
use crate::models::{
    EnrichedUpdate, Freshness, LocationFix, LocationSample, PollPlan, SignalReadings,
    TrackingProfile,
};
use crate::services::geofence::GeofenceMonitor;
use crate::services::sampling::AdaptiveSamplingController;
use crate::services::signals::{read_signals, SignalProvider};
use crate::services::subscribers::{Subscribers, Subscription};
use crate::services::sync_queue::MutationSyncQueue;
use crate::time_utils::Clock;

/// Samples older than this are stale.
pub const STALE_AFTER_SECS: i64 = 300;

/// Classify a sample by age. Exactly five minutes old still counts as fresh.
pub fn freshness(now: DateTime<Utc>, captured_at: DateTime<Utc>) -> Freshness {
    if now.signed_duration_since(captured_at).num_milliseconds() > STALE_AFTER_SECS * 1000 {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Where the tracking loop gets its samples from.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn next_sample(&self, entity_id: &str, plan: &PollPlan) -> Result<LocationSample>;
}

#[derive(Serialize)]
struct TrailRow<'a> {
    id: String,
    entity_id: &'a str,
    #[serde(flatten)]
    sample: &'a LocationSample,
}

/// Per-entity tracking handle. The gate serialises applying a sample
/// against `stop_tracking`, so nothing lands after the stop returns.
#[derive(Clone)]
struct TrackingControl {
    token: CancellationToken,
    gate: Arc<Mutex<()>>,
}

impl TrackingControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Take the gate, or `None` once tracking was stopped.
    fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        (!self.token.is_cancelled()).then_some(guard)
    }
}

pub struct LocationPublisher {
    profiles: DashMap<String, TrackingProfile>,
    sampler: AdaptiveSamplingController,
    geofences: Arc<GeofenceMonitor>,
    signals: Arc<dyn SignalProvider>,
    clock: Arc<dyn Clock>,
    entity_subscribers: DashMap<String, Arc<Subscribers<EnrichedUpdate>>>,
    all_subscribers: Subscribers<EnrichedUpdate>,
    loops: DashMap<String, TrackingControl>,
    trail: Option<Arc<MutationSyncQueue>>,
}

impl LocationPublisher {
    pub fn new(
        sampler: AdaptiveSamplingController,
        geofences: Arc<GeofenceMonitor>,
        signals: Arc<dyn SignalProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profiles: DashMap::new(),
            sampler,
            geofences,
            signals,
            clock,
            entity_subscribers: DashMap::new(),
            all_subscribers: Subscribers::new(),
            loops: DashMap::new(),
            trail: None,
        }
    }

    /// Persist every ingested sample to `location_samples` through the queue.
    pub fn with_trail(mut self, queue: Arc<MutationSyncQueue>) -> Self {
        self.trail = Some(queue);
        self
    }

    /// Ingest a raw sample and fan out the enriched update.
    pub async fn ingest(&self, entity_id: &str, sample: LocationSample) -> Result<EnrichedUpdate> {
        sample.validate()?;
        let readings = self.readings_for(entity_id, &sample).await;
        let update = self.apply_sample(entity_id, sample, &readings);
        self.record_trail(entity_id, &update.sample).await;
        Ok(update)
    }

    /// Ingest from the tracking loop. Returns `None` if tracking stopped
    /// before the sample could be applied.
    async fn ingest_tracked(
        &self,
        entity_id: &str,
        sample: LocationSample,
        control: &TrackingControl,
    ) -> Result<Option<EnrichedUpdate>> {
        sample.validate()?;
        let readings = self.readings_for(entity_id, &sample).await;

        let update = {
            let Some(_gate) = control.enter() else {
                tracing::debug!(entity_id, "Tracking stopped; sample dropped");
                return Ok(None);
            };
            self.apply_sample(entity_id, sample, &readings)
        };

        self.record_trail(entity_id, &update.sample).await;
        Ok(Some(update))
    }

    async fn readings_for(&self, entity_id: &str, sample: &LocationSample) -> SignalReadings {
        read_signals(self.signals.as_ref(), entity_id)
            .await
            .with_sample_fallback(sample)
    }

    /// Every in-memory effect of a sample. Never awaits.
    fn apply_sample(
        &self,
        entity_id: &str,
        sample: LocationSample,
        readings: &SignalReadings,
    ) -> EnrichedUpdate {
        let (plan, is_moving) = {
            let mut profile = self
                .profiles
                .entry(entity_id.to_string())
                .or_insert_with(|| TrackingProfile::new(entity_id));
            self.sampler.observe(&mut profile, &sample);
            let plan = self.sampler.next_poll_plan(&mut profile, readings);
            (plan, profile.is_moving)
        };

        let geofence_events = self.geofences.evaluate(entity_id, &sample);
        let update = EnrichedUpdate {
            entity_id: entity_id.to_string(),
            freshness: freshness(self.clock.now(), sample.captured_at),
            fix_source: sample.fix_source(),
            is_moving,
            plan,
            geofence_events,
            sample,
        };

        tracing::debug!(
            entity_id,
            tier = %update.plan.accuracy_tier,
            interval_ms = update.plan.interval_ms,
            freshness = ?update.freshness,
            "Location ingested"
        );

        let entity_subscribers = self
            .entity_subscribers
            .get(entity_id)
            .map(|s| Arc::clone(&s));
        if let Some(subscribers) = entity_subscribers {
            subscribers.publish(&update);
        }
        self.all_subscribers.publish(&update);
        update
    }

    async fn record_trail(&self, entity_id: &str, sample: &LocationSample) {
        let Some(queue) = &self.trail else {
            return;
        };
        let row = TrailRow {
            id: uuid::Uuid::new_v4().to_string(),
            entity_id,
            sample,
        };
        let result = match to_row(&row) {
            Ok(row) => queue
                .submit(
                    collections::LOCATION_SAMPLES,
                    OpType::Insert,
                    serde_json::Value::Object(row),
                    None,
                )
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(entity_id, error = %e, "Failed to record location sample");
        }
    }

    /// Latest sample with its freshness, or `NoLocation` if none was ever seen.
    pub fn latest(&self, entity_id: &str) -> Result<LocationFix> {
        let sample = self
            .profiles
            .get(entity_id)
            .and_then(|p| p.last_sample.clone())
            .ok_or_else(|| AppError::NoLocation(entity_id.to_string()))?;
        let now = self.clock.now();
        Ok(LocationFix {
            entity_id: entity_id.to_string(),
            freshness: freshness(now, sample.captured_at),
            age_secs: now.signed_duration_since(sample.captured_at).num_seconds(),
            sample,
        })
    }

    /// Latest sample, only if it is still fresh.
    pub fn latest_fresh(&self, entity_id: &str) -> Option<LocationSample> {
        self.latest(entity_id)
            .ok()
            .filter(|fix| fix.freshness == Freshness::Fresh)
            .map(|fix| fix.sample)
    }

    pub fn is_stale(&self, entity_id: &str) -> Result<bool> {
        Ok(self.latest(entity_id)?.freshness == Freshness::Stale)
    }

    pub fn profile(&self, entity_id: &str) -> Option<TrackingProfile> {
        self.profiles.get(entity_id).map(|p| p.clone())
    }

    pub async fn set_destination(
        &self,
        entity_id: &str,
        destination: Option<Coordinates>,
    ) -> PollPlan {
        self.profiles
            .entry(entity_id.to_string())
            .or_insert_with(|| TrackingProfile::new(entity_id))
            .destination = destination;
        self.refresh_plan(entity_id).await
    }

    pub async fn set_background(&self, entity_id: &str, is_background: bool) -> PollPlan {
        self.profiles
            .entry(entity_id.to_string())
            .or_insert_with(|| TrackingProfile::new(entity_id))
            .is_background = is_background;
        self.refresh_plan(entity_id).await
    }

    /// Re-read signals and recompute the plan without a new sample.
    pub async fn refresh_plan(&self, entity_id: &str) -> PollPlan {
        let readings = self.current_readings(entity_id).await;
        self.apply_plan(entity_id, &readings)
    }

    async fn current_readings(&self, entity_id: &str) -> SignalReadings {
        let readings = read_signals(self.signals.as_ref(), entity_id).await;
        match self
            .profiles
            .get(entity_id)
            .and_then(|p| p.last_sample.clone())
        {
            Some(sample) => readings.with_sample_fallback(&sample),
            None => readings,
        }
    }

    fn apply_plan(&self, entity_id: &str, readings: &SignalReadings) -> PollPlan {
        let mut profile = self
            .profiles
            .entry(entity_id.to_string())
            .or_insert_with(|| TrackingProfile::new(entity_id));
        self.sampler.next_poll_plan(&mut profile, readings)
    }

    pub fn subscribe<F>(&self, entity_id: &str, handler: F) -> Subscription
    where
        F: Fn(&EnrichedUpdate) + Send + Sync + 'static,
    {
        self.entity_subscribers
            .entry(entity_id.to_string())
            .or_default()
            .subscribe(handler)
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EnrichedUpdate) + Send + Sync + 'static,
    {
        self.all_subscribers.subscribe(handler)
    }

    pub fn is_tracking(&self, entity_id: &str) -> bool {
        self.loops.contains_key(entity_id)
    }

    /// Spawn the sampling loop for an entity. Returns `false` if one is
    /// already running.
    pub fn start_tracking(self: &Arc<Self>, entity_id: &str, source: Arc<dyn LocationSource>) -> bool {
        let control = TrackingControl::new();
        match self.loops.entry(entity_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(control.clone());
            }
        }

        tracing::info!(entity_id, "Tracking started");
        let publisher = Arc::clone(self);
        let entity_id = entity_id.to_string();
        tokio::spawn(async move {
            publisher.run_tracking(&entity_id, source, control).await;
        });
        true
    }

    async fn run_tracking(&self, entity_id: &str, source: Arc<dyn LocationSource>, control: TrackingControl) {
        let token = control.token.clone();
        loop {
            let readings = self.current_readings(entity_id).await;
            let plan = {
                let Some(_gate) = control.enter() else {
                    break;
                };
                self.apply_plan(entity_id, &readings)
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(plan.interval_ms)) => {}
            }

            let sample = tokio::select! {
                _ = token.cancelled() => break,
                sample = source.next_sample(entity_id, &plan) => sample,
            };

            let sample = match sample {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!(entity_id, error = %e, "Location read failed");
                    continue;
                }
            };

            if self.within_movement_filter(entity_id, &sample, &plan) {
                tracing::debug!(entity_id, "Sample inside movement filter; skipped");
                continue;
            }

            if let Err(e) = self.ingest_tracked(entity_id, sample, &control).await {
                tracing::warn!(entity_id, error = %e, "Tracked sample rejected");
            }
        }
        tracing::debug!(entity_id, "Tracking loop exited");
    }

    /// A sample closer than the filter to a still-fresh previous sample adds
    /// nothing.
    fn within_movement_filter(&self, entity_id: &str, sample: &LocationSample, plan: &PollPlan) -> bool {
        let Some(last) = self
            .profiles
            .get(entity_id)
            .and_then(|p| p.last_sample.clone())
        else {
            return false;
        };
        freshness(self.clock.now(), last.captured_at) == Freshness::Fresh
            && last.distance_to(sample) < plan.movement_filter_m
    }

    /// Stop tracking: ends the loop, cancels dwell timers and forgets the
    /// entity's profile and subscribers. Takes effect before returning: a
    /// sample already in flight either finishes first or is dropped.
    pub fn stop_tracking(&self, entity_id: &str) -> bool {
        let control = self.loops.remove(entity_id).map(|(_, control)| control);
        let _gate = control.as_ref().map(|control| {
            let guard = control.gate.lock().unwrap_or_else(PoisonError::into_inner);
            control.token.cancel();
            guard
        });
        let was_tracking = control.is_some();

        self.geofences.clear_entity(entity_id);
        self.profiles.remove(entity_id);
        if let Some((_, subscribers)) = self.entity_subscribers.remove(entity_id) {
            subscribers.clear();
        }
        tracing::info!(entity_id, was_tracking, "Tracking stopped");
        was_tracking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    #[test]
    fn freshness_boundary() {
        let captured = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(freshness(captured, captured), Freshness::Fresh);
        assert_eq!(
            freshness(captured + ChronoDuration::seconds(300), captured),
            Freshness::Fresh
        );
        assert_eq!(
            freshness(captured + ChronoDuration::milliseconds(300_001), captured),
            Freshness::Stale
        );
    }
}
