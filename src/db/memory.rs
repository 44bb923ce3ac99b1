// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process row store with failure injection.

use crate::db::{Filter, OpType, Row, Storage};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// A write that reached the store, in application order.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedWrite {
    pub table: String,
    pub op: OpType,
    pub id: Option<String>,
}

/// `dashmap`-backed [`Storage`]. Rows within a table are kept sorted by id.
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<String, BTreeMap<String, Row>>,
    offline: AtomicBool,
    fail_writes: DashMap<String, u32>,
    failing_rows: DashSet<(String, String)>,
    applied: Mutex<Vec<AppliedWrite>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read and write fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` writes to `table`.
    pub fn fail_next_writes(&self, table: &str, count: u32) {
        self.fail_writes.insert(table.to_string(), count);
    }

    /// Fail every write touching the row `id` in `table`.
    pub fn fail_row(&self, table: &str, id: &str) {
        self.failing_rows.insert((table.to_string(), id.to_string()));
    }

    pub fn heal_row(&self, table: &str, id: &str) {
        self.failing_rows.remove(&(table.to_string(), id.to_string()));
    }

    /// Snapshot of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every successful write so far.
    pub fn applied_writes(&self) -> Vec<AppliedWrite> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_write_allowed(&self, table: &str, id: Option<&str>) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::WriteFailed("store unreachable".to_string()));
        }
        if let Some(id) = id {
            if self
                .failing_rows
                .contains(&(table.to_string(), id.to_string()))
            {
                return Err(AppError::WriteFailed(format!("write to {table}/{id} rejected")));
            }
        }
        if let Some(mut remaining) = self.fail_writes.get_mut(table) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::WriteFailed(format!("injected failure on {table}")));
            }
        }
        Ok(())
    }

    fn record(&self, table: &str, op: OpType, id: Option<String>) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AppliedWrite {
                table: table.to_string(),
                op,
                id,
            });
    }
}

fn payload_id(payload: &Value) -> Option<&str> {
    payload.get("id").and_then(Value::as_str)
}

fn target_filter(payload: &Value, filter: Option<&Filter>) -> Result<Filter> {
    match (filter, payload_id(payload)) {
        (Some(filter), _) => Ok(filter.clone()),
        (None, Some(id)) => Ok(Filter::by_id(id)),
        (None, None) => Err(AppError::BadRequest(
            "write needs a filter or a payload id".to_string(),
        )),
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn read(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Database("store unreachable".to_string()));
        }
        Ok(self
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write(
        &self,
        table: &str,
        op: OpType,
        payload: &Value,
        filter: Option<&Filter>,
    ) -> Result<usize> {
        let pinned = filter
            .and_then(Filter::pinned_id)
            .or_else(|| payload_id(payload))
            .map(str::to_string);
        self.check_write_allowed(table, pinned.as_deref())?;

        let affected = match op {
            OpType::Insert => {
                let Value::Object(row) = payload else {
                    return Err(AppError::BadRequest("insert payload must be an object".into()));
                };
                let id = payload_id(payload)
                    .ok_or_else(|| AppError::BadRequest("insert payload needs an id".into()))?
                    .to_string();
                self.tables
                    .entry(table.to_string())
                    .or_default()
                    .insert(id, row.clone());
                1
            }
            OpType::Update => {
                let Value::Object(fields) = payload else {
                    return Err(AppError::BadRequest("update payload must be an object".into()));
                };
                let filter = target_filter(payload, filter)?;
                let mut rows = self.tables.entry(table.to_string()).or_default();
                let mut count = 0;
                for row in rows.values_mut().filter(|row| filter.matches(row)) {
                    for (key, value) in fields {
                        row.insert(key.clone(), value.clone());
                    }
                    count += 1;
                }
                count
            }
            OpType::Delete => {
                let filter = target_filter(payload, filter)?;
                let mut rows = self.tables.entry(table.to_string()).or_default();
                let before = rows.len();
                rows.retain(|_, row| !filter.matches(row));
                before - rows.len()
            }
        };

        if affected > 0 {
            self.record(table, op, pinned);
        }
        Ok(affected)
    }
}
