// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Delivery coordinator: location tracking, geofencing, offline-tolerant
//! writes and assignment offers for a delivery fleet.
//!
//! This crate provides the coordination core plus a small HTTP surface
//! for driving it.

pub mod config;
pub mod db;
pub mod error;
pub mod geo_utils;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{collections, to_row, OpType, Storage};
use models::{GeofenceEvent, GeofenceEventKind};
use serde::Serialize;
use serde_json::{json, Value};
use services::{
    AdaptiveSamplingController, AssignmentManager, ExpirationSweeper, GeofenceMonitor,
    LocationPublisher, LogNotifier, MutationSyncQueue, NotificationKind, Notifier,
    ReportedSignals, SamplingConfig, SyncQueueOptions, WebhookNotifier,
};
use std::sync::Arc;
use time_utils::Clock;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub signals: Arc<ReportedSignals>,
    pub geofences: Arc<GeofenceMonitor>,
    pub publisher: Arc<LocationPublisher>,
    pub sync_queue: Arc<MutationSyncQueue>,
    pub assignments: Arc<AssignmentManager>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Wire the services together over `store`.
    ///
    /// The notifier is chosen from config: a webhook when a URL is set,
    /// otherwise the log.
    pub fn new(config: Config, store: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        };
        let queue_options = SyncQueueOptions {
            log_path: config.sync_log_path.clone(),
            ..SyncQueueOptions::default()
        };
        Self::assemble(config, store, clock, notifier, queue_options)
    }

    /// Wire the services with explicit collaborators.
    pub fn assemble(
        config: Config,
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        queue_options: SyncQueueOptions,
    ) -> Self {
        let sync_queue = Arc::new(MutationSyncQueue::new(
            store.clone(),
            clock.clone(),
            queue_options,
        ));

        let signals = Arc::new(ReportedSignals::new());
        let geofences = Arc::new(GeofenceMonitor::new(clock.clone()));
        forward_geofence_events(&geofences, notifier.clone());
        record_geofence_events(&geofences, sync_queue.clone());

        let publisher = Arc::new(
            LocationPublisher::new(
                AdaptiveSamplingController::new(SamplingConfig::default()),
                geofences.clone(),
                signals.clone(),
                clock.clone(),
            )
            .with_trail(sync_queue.clone()),
        );

        let assignments = Arc::new(
            AssignmentManager::new(
                store.clone(),
                sync_queue.clone(),
                notifier.clone(),
                clock.clone(),
                chrono::Duration::seconds(config.offer_ttl_secs),
            )
            .with_publisher(publisher.clone())
            .with_geofences(geofences.clone()),
        );
        let sweeper = Arc::new(ExpirationSweeper::new(assignments.clone(), clock.clone()));

        Self {
            config,
            store,
            clock,
            signals,
            geofences,
            publisher,
            sync_queue,
            assignments,
            sweeper,
            notifier,
        }
    }
}

fn forward_geofence_events(geofences: &GeofenceMonitor, notifier: Arc<dyn Notifier>) {
    geofences
        .subscribe(move |event| {
            let kind = match event.kind {
                GeofenceEventKind::Enter => NotificationKind::GeofenceEnter,
                GeofenceEventKind::Exit => NotificationKind::GeofenceExit,
                GeofenceEventKind::Dwell => NotificationKind::GeofenceDwell,
            };
            notifier.notify(
                &event.entity_id,
                kind,
                json!({
                    "region_id": event.region_id,
                    "latitude": event.latitude,
                    "longitude": event.longitude,
                    "metadata": event.metadata,
                }),
            );
        })
        .detach();
}

#[derive(Serialize)]
struct GeofenceEventRow {
    id: String,
    #[serde(flatten)]
    event: GeofenceEvent,
}

/// Append every geofence event to `geofence_events` through the sync queue.
///
/// Events are handed to a single writer task so they are submitted in the
/// order they were raised.
fn record_geofence_events(geofences: &GeofenceMonitor, queue: Arc<MutationSyncQueue>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No runtime; geofence events will not be recorded");
        return;
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<GeofenceEvent>();
    geofences
        .subscribe(move |event| {
            let _ = tx.send(event.clone());
        })
        .detach();

    handle.spawn(async move {
        while let Some(event) = rx.recv().await {
            let region_id = event.region_id.clone();
            let row = GeofenceEventRow {
                id: uuid::Uuid::new_v4().to_string(),
                event,
            };
            let result = match to_row(&row) {
                Ok(row) => queue
                    .submit(collections::GEOFENCE_EVENTS, OpType::Insert, Value::Object(row), None)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(region_id = %region_id, error = %e, "Failed to record geofence event");
            }
        }
    });
}
