// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Values are read once at startup. Optional tunables fall back to their
//! defaults when unset or unparsable.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Which storage collaborator backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process store (local development, tests).
    Memory,
    /// Google Cloud Firestore (or its emulator).
    Firestore,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "firestore" => Ok(Self::Firestore),
            _ => Err(ConfigError::Invalid("STORAGE_BACKEND", value.to_string())),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Storage collaborator implementation
    pub storage_backend: StorageBackend,
    /// GCP project ID (Firestore backend)
    pub gcp_project_id: String,
    /// Shared secret expected on `/tasks/*` trigger requests
    pub tasks_token: String,
    /// Expiration sweeper period
    pub sweep_interval_secs: u64,
    /// Periodic sync queue flush period
    pub flush_interval_secs: u64,
    /// Lifetime of a freshly created offer
    pub offer_ttl_secs: i64,
    /// File backing the durable sync operation log
    pub sync_log_path: Option<PathBuf>,
    /// Webhook target for notifications (log-only when unset)
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            storage_backend: StorageBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            tasks_token: "test_tasks_token".to_string(),
            sweep_interval_secs: 60,
            flush_interval_secs: 30,
            offer_ttl_secs: 120,
            sync_log_path: None,
            notify_webhook_url: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::Memory,
        };

        let tasks_token = env::var("TASKS_TOKEN")
            .map(|v| v.trim().to_string())
            .map_err(|_| ConfigError::Missing("TASKS_TOKEN"))?;
        if tasks_token.is_empty() {
            return Err(ConfigError::Invalid("TASKS_TOKEN", String::new()));
        }

        Ok(Self {
            port: parse_or("PORT", 8080),
            storage_backend,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            tasks_token,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60),
            flush_interval_secs: parse_or("FLUSH_INTERVAL_SECS", 30),
            offer_ttl_secs: parse_or("OFFER_TTL_SECS", 120),
            sync_log_path: env::var("SYNC_LOG_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
