// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, TimeZone, Utc};
use delivery_coordinator::config::Config;
use delivery_coordinator::db::{MemoryStore, Storage};
use delivery_coordinator::geo_utils::Coordinates;
use delivery_coordinator::models::Candidate;
use delivery_coordinator::routes::create_router;
use delivery_coordinator::services::{
    MutationSyncQueue, RecordingNotifier, RetryPolicy, SyncQueueOptions,
};
use delivery_coordinator::time_utils::{Clock, ManualClock};
use delivery_coordinator::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Fixed starting instant for every test clock.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// Queue options that never sleep inside a single write attempt.
#[allow(dead_code)]
pub fn fast_queue_options() -> SyncQueueOptions {
    SyncQueueOptions {
        policy: RetryPolicy::default(),
        write_policy: RetryPolicy::new(1, Duration::from_millis(1)),
        log_path: None,
    }
}

/// Everything a test needs to drive and inspect the app.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    #[allow(dead_code)]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Create a test app over an in-memory store and a manual clock.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let notifier = Arc::new(RecordingNotifier::new());

    let state = Arc::new(AppState::assemble(
        Config::test_default(),
        store.clone(),
        clock.clone(),
        notifier.clone(),
        fast_queue_options(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        clock,
        notifier,
    }
}

/// A standalone queue over its own store.
#[allow(dead_code)]
pub fn test_queue() -> (Arc<MutationSyncQueue>, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let queue = Arc::new(MutationSyncQueue::new(
        store.clone() as Arc<dyn Storage>,
        clock.clone() as Arc<dyn Clock>,
        fast_queue_options(),
    ));
    (queue, store, clock)
}

#[allow(dead_code)]
pub const PICKUP: Coordinates = Coordinates {
    latitude: 37.7749,
    longitude: -122.4194,
};

/// Candidate `meters` north of the pickup.
#[allow(dead_code)]
pub fn candidate(id: &str, meters: f64, rating: f64, active_orders: u32) -> Candidate {
    let point = delivery_coordinator::geo_utils::offset_north(PICKUP.point(), meters);
    Candidate {
        id: id.to_string(),
        location: Some(Coordinates::from(point)),
        rating,
        active_orders,
    }
}
