// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Circular geofence monitoring with enter/exit/dwell events.
//!
//! Membership is tracked per `(entity_id, region_id)` and only exists while
//! the entity is inside; an exit removes it. Dwell timers are
//! one-shot tokio tasks; each arm bumps a generation counter and the timer
//! only fires if the membership it was armed for is still current, so an
//! exit (or exit and re-entry) before the deadline never produces a dwell
//! for the earlier visit.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::geo_utils::haversine_distance_m;
use crate::models::{
    GeofenceError, GeofenceEvent, GeofenceEventKind, GeofenceRegion, LocationSample,
    RegionMembership,
};
use crate::services::subscribers::{Subscribers, Subscription};
use crate::time_utils::Clock;

type MembershipKey = (String, String);
type RegionSet = BTreeMap<String, Arc<GeofenceRegion>>;

#[derive(Debug, Clone)]
struct MembershipState {
    entered_at: DateTime<Utc>,
    generation: u64,
}

struct DwellTimer {
    token: CancellationToken,
    generation: u64,
}

/// Evaluates samples against the registered regions.
pub struct GeofenceMonitor {
    regions: ArcSwap<RegionSet>,
    memberships: Arc<DashMap<MembershipKey, MembershipState>>,
    dwell_timers: Arc<DashMap<MembershipKey, DwellTimer>>,
    subscribers: Arc<Subscribers<GeofenceEvent>>,
    generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl GeofenceMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            regions: ArcSwap::from_pointee(BTreeMap::new()),
            memberships: Arc::new(DashMap::new()),
            dwell_timers: Arc::new(DashMap::new()),
            subscribers: Arc::new(Subscribers::new()),
            generation: AtomicU64::new(0),
            clock,
        }
    }

    /// Register or replace a region.
    pub fn add_region(&self, region: GeofenceRegion) -> Result<(), GeofenceError> {
        if region.id.trim().is_empty() {
            return Err(GeofenceError::MissingId);
        }
        if !(region.radius_m.is_finite() && region.radius_m > 0.0) {
            return Err(GeofenceError::InvalidRadius(region.radius_m));
        }
        region.validate()?;

        tracing::debug!(region_id = %region.id, radius_m = region.radius_m, "Geofence registered");
        let region = Arc::new(region);
        self.regions.rcu(|current| {
            let mut next = RegionSet::clone(current);
            next.insert(region.id.clone(), Arc::clone(&region));
            next
        });
        Ok(())
    }

    /// Remove a region, its memberships and any armed dwell timers.
    pub fn remove_region(&self, region_id: &str) -> bool {
        let previous = self.regions.rcu(|current| {
            let mut next = RegionSet::clone(current);
            next.remove(region_id);
            next
        });
        if !previous.contains_key(region_id) {
            return false;
        }

        self.dwell_timers.retain(|(_, region), timer| {
            let keep = region != region_id;
            if !keep {
                timer.token.cancel();
            }
            keep
        });
        self.memberships.retain(|(_, region), _| region != region_id);
        tracing::debug!(region_id, "Geofence removed");
        true
    }

    pub fn regions(&self) -> Vec<Arc<GeofenceRegion>> {
        self.regions.load().values().cloned().collect()
    }

    /// Receive every event, including dwell events raised by timers.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&GeofenceEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Evaluate a sample against a snapshot of the region set.
    ///
    /// Returns the enter/exit events raised by this sample; dwell events are
    /// delivered to subscribers when their timer fires.
    pub fn evaluate(&self, entity_id: &str, sample: &LocationSample) -> Vec<GeofenceEvent> {
        let regions = self.regions.load_full();
        let position = sample.point();
        let mut events = Vec::new();

        for region in regions.values() {
            let inside = haversine_distance_m(position, region.center()) <= region.radius_m;
            let key = (entity_id.to_string(), region.id.clone());

            match self.memberships.entry(key.clone()) {
                Entry::Vacant(slot) if inside => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let _ = slot.insert(MembershipState {
                        entered_at: sample.captured_at,
                        generation,
                    });

                    if region.notify_on_enter {
                        events.push(event_for(
                            region,
                            entity_id,
                            GeofenceEventKind::Enter,
                            sample,
                            sample.captured_at,
                        ));
                    }
                    if region.notify_on_dwell {
                        self.arm_dwell(key, Arc::clone(region), sample.clone(), generation);
                    }
                }
                Entry::Occupied(slot) if !inside => {
                    slot.remove();

                    self.cancel_dwell(&key);
                    if region.notify_on_exit {
                        events.push(event_for(
                            region,
                            entity_id,
                            GeofenceEventKind::Exit,
                            sample,
                            sample.captured_at,
                        ));
                    }
                }
                _ => {}
            }
        }

        for event in &events {
            tracing::info!(
                entity_id,
                region_id = %event.region_id,
                kind = ?event.kind,
                "Geofence transition"
            );
            self.subscribers.publish(event);
        }
        events
    }

    /// Current memberships of one entity.
    pub fn memberships(&self, entity_id: &str) -> Vec<RegionMembership> {
        let mut out: Vec<RegionMembership> = self
            .memberships
            .iter()
            .filter(|entry| entry.key().0 == entity_id)
            .map(|entry| {
                let (entity_id, region_id) = entry.key().clone();
                RegionMembership {
                    dwell_timer_active: self.dwell_timers.contains_key(entry.key()),
                    region_id,
                    entity_id,
                    is_inside: true,
                    entered_at: Some(entry.entered_at),
                }
            })
            .collect();
        out.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        out
    }

    /// Forget an entity: cancel its dwell timers and drop its memberships.
    pub fn clear_entity(&self, entity_id: &str) {
        self.dwell_timers.retain(|(entity, _), timer| {
            let keep = entity != entity_id;
            if !keep {
                timer.token.cancel();
            }
            keep
        });
        self.memberships.retain(|(entity, _), _| entity != entity_id);
    }

    fn cancel_dwell(&self, key: &MembershipKey) {
        if let Some((_, timer)) = self.dwell_timers.remove(key) {
            timer.token.cancel();
        }
    }

    fn arm_dwell(
        &self,
        key: MembershipKey,
        region: Arc<GeofenceRegion>,
        sample: LocationSample,
        generation: u64,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(region_id = %region.id, "No runtime for dwell timer; dwell skipped");
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = self.dwell_timers.insert(
            key.clone(),
            DwellTimer {
                token: token.clone(),
                generation,
            },
        ) {
            previous.token.cancel();
        }

        // Deadline is fixed now, not when the task is first polled.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(region.dwell_ms);
        let memberships = Arc::clone(&self.memberships);
        let timers = Arc::clone(&self.dwell_timers);
        let subscribers = Arc::clone(&self.subscribers);
        let clock = Arc::clone(&self.clock);

        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            timers.remove_if(&key, |_, timer| timer.generation == generation);
            let current = memberships
                .get(&key)
                .is_some_and(|m| m.generation == generation);
            if !current || token.is_cancelled() {
                return;
            }

            let event = event_for(&region, &key.0, GeofenceEventKind::Dwell, &sample, clock.now());
            tracing::info!(entity_id = %key.0, region_id = %region.id, "Geofence dwell");
            subscribers.publish(&event);
        });
    }
}

fn event_for(
    region: &GeofenceRegion,
    entity_id: &str,
    kind: GeofenceEventKind,
    sample: &LocationSample,
    occurred_at: DateTime<Utc>,
) -> GeofenceEvent {
    GeofenceEvent {
        region_id: region.id.clone(),
        entity_id: entity_id.to_string(),
        kind,
        latitude: sample.latitude,
        longitude: sample.longitude,
        accuracy_meters: sample.accuracy_meters,
        occurred_at,
        metadata: region.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::{offset_north, Coordinates};
    use crate::time_utils::SystemClock;
    use geo::Point;

    fn monitor() -> GeofenceMonitor {
        GeofenceMonitor::new(Arc::new(SystemClock))
    }

    fn sample_at(point: Point<f64>) -> LocationSample {
        LocationSample::at(Coordinates::from(point), Utc::now())
    }

    #[test]
    fn rejects_non_positive_radius() {
        let monitor = monitor();
        assert!(matches!(
            monitor.add_region(GeofenceRegion::new("r", 37.0, -122.0, 0.0)),
            Err(GeofenceError::InvalidRadius(_))
        ));
        assert!(monitor
            .add_region(GeofenceRegion::new("r", 37.0, -122.0, -5.0))
            .is_err());
        assert!(monitor.regions().is_empty());
    }

    #[test]
    fn boundary_counts_as_inside() {
        let monitor = monitor();
        let center = Point::new(-122.0, 37.0);
        monitor
            .add_region(GeofenceRegion::new("store", center.y(), center.x(), 1000.0))
            .unwrap();

        let events = monitor.evaluate("driver-1", &sample_at(offset_north(center, 999.0)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GeofenceEventKind::Enter);

        let events = monitor.evaluate("driver-1", &sample_at(offset_north(center, 1001.0)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GeofenceEventKind::Exit);
    }

    #[test]
    fn no_transition_no_event() {
        let monitor = monitor();
        let center = Point::new(-122.0, 37.0);
        monitor
            .add_region(GeofenceRegion::new("store", center.y(), center.x(), 100.0))
            .unwrap();

        assert_eq!(monitor.evaluate("d", &sample_at(center)).len(), 1);
        assert!(monitor.evaluate("d", &sample_at(center)).is_empty());
        assert!(monitor.memberships("d")[0].is_inside);
    }

    #[test]
    fn disabled_notifications_still_track_membership() {
        let monitor = monitor();
        let center = Point::new(-122.0, 37.0);
        let mut region = GeofenceRegion::new("quiet", center.y(), center.x(), 100.0);
        region.notify_on_enter = false;
        region.notify_on_exit = false;
        monitor.add_region(region).unwrap();

        assert!(monitor.evaluate("d", &sample_at(center)).is_empty());
        assert!(monitor.memberships("d")[0].is_inside);
        assert!(monitor
            .evaluate("d", &sample_at(offset_north(center, 500.0)))
            .is_empty());
        assert!(monitor.memberships("d").is_empty());
    }

    #[test]
    fn samples_outside_every_region_leave_no_state() {
        let monitor = monitor();
        let center = Point::new(-122.0, 37.0);
        monitor
            .add_region(GeofenceRegion::new("store", center.y(), center.x(), 100.0))
            .unwrap();

        for i in 0..50 {
            let entity = format!("passer-{i}");
            monitor.evaluate(&entity, &sample_at(offset_north(center, 5_000.0)));
            assert!(monitor.memberships(&entity).is_empty());
        }
        assert!(monitor.memberships.is_empty());
    }

    #[test]
    fn removing_region_clears_membership() {
        let monitor = monitor();
        let center = Point::new(-122.0, 37.0);
        monitor
            .add_region(GeofenceRegion::new("store", center.y(), center.x(), 100.0))
            .unwrap();
        monitor.evaluate("d", &sample_at(center));

        assert!(monitor.remove_region("store"));
        assert!(!monitor.remove_region("store"));
        assert!(monitor.memberships("d").is_empty());
    }
}
