// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Delivery Coordinator API Server
//!
//! Tracks fleet locations, raises geofence events, buffers writes while
//! offline and runs the assignment offer lifecycle.

use delivery_coordinator::{
    config::{Config, StorageBackend},
    db::{FirestoreStore, MemoryStore, Storage},
    time_utils::SystemClock,
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, backend = ?config.storage_backend, "Starting delivery coordinator");

    let store: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Firestore => Arc::new(FirestoreStore::new(&config.gcp_project_id).await?),
    };

    let state = Arc::new(AppState::new(config.clone(), store, Arc::new(SystemClock)));

    let restored = state.sync_queue.restore().await?;
    if restored > 0 {
        tracing::info!(count = restored, "Restored pending sync operations");
    }

    let shutdown = CancellationToken::new();
    let sweeper = state.sweeper.spawn(
        Duration::from_secs(config.sweep_interval_secs),
        shutdown.child_token(),
    );
    let flusher = state.sync_queue.spawn_periodic_flush(
        Duration::from_secs(config.flush_interval_secs),
        shutdown.child_token(),
    );

    let app = delivery_coordinator::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(sweeper, flusher);
    tracing::info!("Shut down");
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("delivery_coordinator=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
