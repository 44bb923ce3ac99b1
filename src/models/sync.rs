// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pending writes and flush results for the mutation sync queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Filter, OpType};

/// A write waiting to be replayed against storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub table_name: String,
    pub op_type: OpType,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_filter: Option<Filter>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(
        default,
        with = "crate::time_utils::rfc3339_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    pub fn new(
        table_name: impl Into<String>,
        op_type: OpType,
        payload: Value,
        match_filter: Option<Filter>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            table_name: table_name.into(),
            op_type,
            payload,
            match_filter,
            created_at,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
        }
    }

    /// Whether a scheduled flush may attempt this operation at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushSkipped {
    Offline,
    Paused,
    InFlight,
}

/// How a flush treats backoff deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Respect `next_retry_at`.
    Scheduled,
    /// Attempt everything now, e.g. right after connectivity returns.
    Immediate,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    pub applied: usize,
    pub retried: usize,
    /// Ids dropped after reaching the retry ceiling in this pass.
    pub dropped: Vec<String>,
    /// Operations not attempted because an earlier one is still pending.
    pub deferred: usize,
    pub remaining: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<FlushSkipped>,
}

impl FlushReport {
    pub fn skipped(reason: FlushSkipped, remaining: usize) -> Self {
        Self {
            remaining,
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// An operation given up on, kept for the operator view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedOperation {
    pub operation: SyncOperation,
    pub reason: String,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub dropped_at: DateTime<Utc>,
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub flush_passes: u64,
    pub applied: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
    pub enqueued: u64,
    pub cancelled: u64,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub paused: bool,
    pub pending: Vec<SyncOperation>,
    pub dropped: Vec<DroppedOperation>,
    pub stats: SyncStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn new_operations_are_due_immediately() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut op = SyncOperation::new("orders", OpType::Insert, json!({"id": "o1"}), None, now);
        assert!(op.is_due(now));

        op.next_retry_at = Some(now + Duration::seconds(1));
        assert!(!op.is_due(now));
        assert!(op.is_due(now + Duration::seconds(1)));
    }

    #[test]
    fn operations_survive_a_json_round_trip() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut op = SyncOperation::new(
            "orders",
            OpType::Update,
            json!({"status": "assigned"}),
            Some(Filter::by_id("o1")),
            now,
        );
        op.retry_count = 2;
        op.next_retry_at = Some(now + Duration::seconds(4));

        let text = serde_json::to_string(&op).unwrap();
        let back: SyncOperation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, op);
    }
}
