// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Offline mutation queue.
//!
//! Writes that cannot reach storage are queued in enqueue order and replayed
//! by `flush`. An operation is never applied before an earlier one: the first
//! operation that is not yet due or that fails again blocks the rest of the
//! pass. Each failure bumps `retry_count` and schedules the next attempt
//! `base_delay * 2^retry_count` later; reaching the ceiling drops the
//! operation, which is logged and kept (bounded) for the operator view.
//!
//! The queue can be mirrored to a JSON file that is rewritten after every
//! mutation and reloaded at startup.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{collections, Filter, OpType, Storage};
use crate::error::{AppError, Result};
use crate::models::{
    DroppedOperation, FlushMode, FlushReport, FlushSkipped, SyncOperation, SyncStats, SyncStatus,
};
use crate::services::retry::{exhausted, retry_with_backoff, RetryPolicy};
use crate::time_utils::{format_utc_rfc3339, Clock};

/// Dropped operations kept for the status view.
pub const DROPPED_CAPACITY: usize = 100;

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct SyncQueueOptions {
    /// Operation-level ceiling and backoff between flush passes.
    pub policy: RetryPolicy,
    /// Retry applied to each individual write attempt.
    pub write_policy: RetryPolicy,
    pub log_path: Option<PathBuf>,
}

impl Default for SyncQueueOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            write_policy: RetryPolicy::new(3, Duration::from_millis(500)),
            log_path: None,
        }
    }
}

/// Result of [`MutationSyncQueue::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Applied,
    Queued { operation_id: String },
}

#[derive(Serialize, Deserialize)]
struct LogFile {
    operations: Vec<SyncOperation>,
}

/// Clears the in-flight flag when a flush pass ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MutationSyncQueue {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    options: SyncQueueOptions,
    queue: Mutex<VecDeque<SyncOperation>>,
    dropped: Mutex<VecDeque<DroppedOperation>>,
    stats: Mutex<SyncStats>,
    online: AtomicBool,
    paused: AtomicBool,
    flushing: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
    /// Serialises `submit` so submissions land in call order.
    submit_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MutationSyncQueue {
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, options: SyncQueueOptions) -> Self {
        Self {
            store,
            clock,
            options,
            queue: Mutex::new(VecDeque::new()),
            dropped: Mutex::new(VecDeque::new()),
            stats: Mutex::new(SyncStats::default()),
            online: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
            submit_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.options.policy
    }

    /// Reload operations from the log file, if one is configured and exists.
    pub async fn restore(&self) -> Result<usize> {
        let Some(path) = &self.options.log_path else {
            return Ok(0);
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "reading sync log {}: {e}",
                    path.display()
                )))
            }
        };
        let log: LogFile = serde_json::from_str(&text)?;
        let count = log.operations.len();
        {
            let mut queue = lock(&self.queue);
            let known: Vec<String> = queue.iter().map(|op| op.id.clone()).collect();
            for op in log.operations {
                if !known.contains(&op.id) {
                    queue.push_back(op);
                }
            }
        }
        tracing::info!(path = %path.display(), count, "Sync log restored");
        Ok(count)
    }

    /// Append an operation to the tail of the queue.
    pub async fn enqueue(&self, op: SyncOperation) -> Result<()> {
        tracing::debug!(op_id = %op.id, table = %op.table_name, op_type = ?op.op_type, "Operation queued");
        lock(&self.queue).push_back(op);
        lock(&self.stats).enqueued += 1;
        self.persist().await
    }

    /// Write through when possible, otherwise queue.
    ///
    /// Goes straight to storage only when online and nothing is queued, so a
    /// submitted write never overtakes a queued one. Submissions are handled
    /// one at a time: a later call waits while an earlier one is still
    /// retrying its direct write or being queued.
    pub async fn submit(
        &self,
        table: &str,
        op_type: OpType,
        payload: Value,
        filter: Option<Filter>,
    ) -> Result<SubmitOutcome> {
        let _submitting = self.submit_lock.lock().await;
        let direct = self.is_online() && !self.is_paused() && self.is_empty();
        if direct {
            let result = retry_with_backoff(&self.options.write_policy, table, |_| {
                self.store.write(table, op_type, &payload, filter.as_ref())
            })
            .await;
            match result {
                Ok(_) => return Ok(SubmitOutcome::Applied),
                Err(e) if e.is_transient() => {
                    tracing::warn!(table, error = %e, "Write failed, routing to sync queue");
                }
                Err(e) => return Err(e),
            }
        }

        let op = SyncOperation::new(table, op_type, payload, filter, self.clock.now());
        let operation_id = op.id.clone();
        self.enqueue(op).await?;
        Ok(SubmitOutcome::Queued { operation_id })
    }

    /// Remove a queued operation. Returns whether it was present.
    pub async fn cancel(&self, op_id: &str) -> Result<bool> {
        let removed = {
            let mut queue = lock(&self.queue);
            let before = queue.len();
            queue.retain(|op| op.id != op_id);
            before != queue.len()
        };
        if removed {
            lock(&self.stats).cancelled += 1;
            tracing::info!(op_id, "Queued operation cancelled");
            self.persist().await?;
        }
        Ok(removed)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record connectivity. Coming back online replays the queue at once,
    /// ignoring backoff deadlines.
    pub async fn set_online(&self, online: bool) -> Option<FlushReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return None;
        }
        tracing::info!(online, pending = self.len(), "Connectivity changed");
        if online {
            Some(self.flush(FlushMode::Immediate).await)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> Vec<SyncOperation> {
        lock(&self.queue).iter().cloned().collect()
    }

    pub fn dropped(&self) -> Vec<DroppedOperation> {
        lock(&self.dropped).iter().cloned().collect()
    }

    pub fn stats(&self) -> SyncStats {
        *lock(&self.stats)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            online: self.is_online(),
            paused: self.is_paused(),
            pending: self.pending(),
            dropped: self.dropped(),
            stats: self.stats(),
        }
    }

    /// Replay queued operations in order.
    ///
    /// A no-op while offline, paused or while another flush is running.
    pub async fn flush(&self, mode: FlushMode) -> FlushReport {
        if !self.is_online() {
            return FlushReport::skipped(FlushSkipped::Offline, self.len());
        }
        if self.is_paused() {
            return FlushReport::skipped(FlushSkipped::Paused, self.len());
        }
        if self.flushing.swap(true, Ordering::SeqCst) {
            return FlushReport::skipped(FlushSkipped::InFlight, self.len());
        }
        let _guard = FlushGuard(&self.flushing);

        lock(&self.stats).flush_passes += 1;
        let snapshot = self.pending();
        let mut report = FlushReport::default();
        let mut blocked = false;

        for op in snapshot {
            if blocked {
                report.deferred += 1;
                continue;
            }
            if !self.contains(&op.id) {
                continue;
            }
            if mode == FlushMode::Scheduled && !op.is_due(self.clock.now()) {
                blocked = true;
                report.deferred += 1;
                continue;
            }

            match self.apply(&op).await {
                Ok(()) => {
                    self.remove(&op.id);
                    lock(&self.stats).applied += 1;
                    report.applied += 1;
                    tracing::debug!(op_id = %op.id, table = %op.table_name, "Queued operation applied");
                }
                Err(e) if e.is_transient() => {
                    lock(&self.stats).failed_attempts += 1;
                    let retry_count = op.retry_count + 1;
                    if self.options.policy.is_exhausted(retry_count) {
                        let err = exhausted(&op.id, retry_count, &e);
                        report.dropped.push(op.id.clone());
                        self.drop_operation(op, retry_count, err).await;
                    } else {
                        let next_retry_at = self.clock.now() + self.backoff(retry_count);
                        self.mark_failed(&op.id, retry_count, &e, next_retry_at);
                        tracing::warn!(
                            op_id = %op.id,
                            retry_count,
                            next_retry_at = %format_utc_rfc3339(next_retry_at),
                            error = %e,
                            "Queued operation failed"
                        );
                        report.retried += 1;
                        blocked = true;
                    }
                }
                Err(e) => {
                    let retry_count = op.retry_count + 1;
                    report.dropped.push(op.id.clone());
                    self.drop_operation(op, retry_count, e).await;
                }
            }
        }

        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "Failed to persist sync log");
        }
        report.remaining = self.len();
        report
    }

    /// Flush on a fixed period until `token` is cancelled.
    pub fn spawn_periodic_flush(self: &Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if queue.is_empty() {
                    continue;
                }
                let report = queue.flush(FlushMode::Scheduled).await;
                if report.applied > 0 || !report.dropped.is_empty() {
                    tracing::info!(
                        applied = report.applied,
                        dropped = report.dropped.len(),
                        remaining = report.remaining,
                        "Periodic sync flush"
                    );
                }
            }
        })
    }

    async fn apply(&self, op: &SyncOperation) -> Result<()> {
        retry_with_backoff(&self.options.write_policy, &op.id, |_| {
            self.store.write(
                &op.table_name,
                op.op_type,
                &op.payload,
                op.match_filter.as_ref(),
            )
        })
        .await
        .map(|_| ())
    }

    fn backoff(&self, retry_count: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.options.policy.backoff(retry_count))
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }

    fn contains(&self, op_id: &str) -> bool {
        lock(&self.queue).iter().any(|op| op.id == op_id)
    }

    fn remove(&self, op_id: &str) -> Option<SyncOperation> {
        let mut queue = lock(&self.queue);
        let index = queue.iter().position(|op| op.id == op_id)?;
        queue.remove(index)
    }

    fn mark_failed(
        &self,
        op_id: &str,
        retry_count: u32,
        err: &AppError,
        next_retry_at: chrono::DateTime<Utc>,
    ) {
        if let Some(op) = lock(&self.queue).iter_mut().find(|op| op.id == op_id) {
            op.retry_count = retry_count;
            op.last_error = Some(err.to_string());
            op.next_retry_at = Some(next_retry_at);
        }
    }

    async fn drop_operation(&self, mut op: SyncOperation, retry_count: u32, err: AppError) {
        self.remove(&op.id);
        op.retry_count = retry_count;
        op.last_error = Some(err.to_string());
        tracing::error!(
            op_id = %op.id,
            table = %op.table_name,
            retry_count,
            error = %err,
            "Dropping queued operation"
        );

        let dropped_at = self.clock.now();
        let record = json!({
            "id": op.id,
            "table_name": op.table_name,
            "op_type": op.op_type,
            "retry_count": retry_count,
            "last_error": op.last_error,
            "status": "dropped",
            "created_at": format_utc_rfc3339(op.created_at),
            "dropped_at": format_utc_rfc3339(dropped_at),
        });

        lock(&self.stats).dropped += 1;
        {
            let mut dropped = lock(&self.dropped);
            if dropped.len() == DROPPED_CAPACITY {
                dropped.pop_front();
            }
            dropped.push_back(DroppedOperation {
                operation: op,
                reason: err.to_string(),
                dropped_at,
            });
        }

        // Best effort; the store may be the reason the operation was dropped.
        if let Err(e) = self
            .store
            .write(collections::SYNC_OPERATION_LOG, OpType::Insert, &record, None)
            .await
        {
            tracing::debug!(error = %e, "Could not record dropped operation");
        }
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.options.log_path else {
            return Ok(());
        };
        let _write = self.persist_lock.lock().await;
        let log = LogFile {
            operations: self.pending(),
        };
        let text = serde_json::to_string_pretty(&log)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("renaming {}: {e}", tmp.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::time_utils::ManualClock;
    use chrono::TimeZone;

    fn queue_with(store: Arc<MemoryStore>) -> MutationSyncQueue {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let options = SyncQueueOptions {
            write_policy: RetryPolicy::new(1, Duration::from_millis(500)),
            ..SyncQueueOptions::default()
        };
        MutationSyncQueue::new(store, clock, options)
    }

    fn insert(id: &str) -> SyncOperation {
        SyncOperation::new(
            "orders",
            OpType::Insert,
            json!({"id": id}),
            None,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn flush_is_noop_while_offline_or_paused() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        queue.enqueue(insert("a")).await.unwrap();

        queue.online.store(false, Ordering::SeqCst);
        let report = queue.flush(FlushMode::Immediate).await;
        assert_eq!(report.skipped, Some(FlushSkipped::Offline));
        assert_eq!(report.remaining, 1);

        queue.online.store(true, Ordering::SeqCst);
        queue.pause();
        let report = queue.flush(FlushMode::Immediate).await;
        assert_eq!(report.skipped, Some(FlushSkipped::Paused));

        queue.resume();
        let report = queue.flush(FlushMode::Immediate).await;
        assert_eq!(report.applied, 1);
        assert!(queue.is_empty());
        assert_eq!(store.rows("orders").len(), 1);
    }

    #[tokio::test]
    async fn cancelled_operations_are_never_applied() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        let op = insert("a");
        let id = op.id.clone();
        queue.enqueue(op).await.unwrap();

        assert!(queue.cancel(&id).await.unwrap());
        assert!(!queue.cancel(&id).await.unwrap());
        queue.flush(FlushMode::Immediate).await;
        assert!(store.rows("orders").is_empty());
        assert_eq!(queue.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn submit_writes_through_when_idle() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        let outcome = queue
            .submit("orders", OpType::Insert, json!({"id": "a"}), None)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Applied);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn submit_queues_on_write_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let queue = queue_with(store.clone());
        let outcome = queue
            .submit("orders", OpType::Insert, json!({"id": "a"}), None)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn permanent_failures_drop_immediately() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        // Insert without an id is rejected by the store.
        let op = SyncOperation::new("orders", OpType::Insert, json!({"name": "x"}), None, Utc::now());
        let id = op.id.clone();
        queue.enqueue(op).await.unwrap();

        let report = queue.flush(FlushMode::Immediate).await;
        assert_eq!(report.dropped, vec![id]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn second_flush_returns_while_first_in_flight() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store);
        queue.flushing.store(true, Ordering::SeqCst);
        let report = queue.flush(FlushMode::Immediate).await;
        assert_eq!(report.skipped, Some(FlushSkipped::InFlight));
    }

    #[tokio::test]
    async fn log_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("sync-log-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("queue.json");

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let options = SyncQueueOptions {
            log_path: Some(path.clone()),
            ..SyncQueueOptions::default()
        };
        let queue = MutationSyncQueue::new(store.clone(), clock.clone(), options.clone());
        queue.enqueue(insert("a")).await.unwrap();
        queue.enqueue(insert("b")).await.unwrap();

        let reloaded = MutationSyncQueue::new(store, clock, options);
        assert_eq!(reloaded.restore().await.unwrap(), 2);
        let ids: Vec<_> = reloaded
            .pending()
            .iter()
            .map(|op| op.payload["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("a"), json!("b")]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
