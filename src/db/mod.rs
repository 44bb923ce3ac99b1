// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Row storage seam.
//!
//! Rows are flat JSON objects keyed by their `id` field. Every component
//! reads and writes through the [`Storage`] trait so that the in-memory
//! store used by tests and single-node deployments and the Firestore store
//! are interchangeable.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored row.
pub type Row = Map<String, Value>;

/// Table names as constants.
pub mod collections {
    pub const ORDERS: &str = "orders";
    pub const ORDER_CANDIDATES: &str = "order_candidates";
    pub const ASSIGNMENT_OFFERS: &str = "assignment_offers";
    /// Append-only offer transitions.
    pub const ASSIGNMENT_OFFER_HISTORY: &str = "assignment_offer_history";
    pub const ORDER_HISTORY: &str = "order_history";
    pub const SYNC_OPERATION_LOG: &str = "sync_operation_log";
    pub const LOCATION_SAMPLES: &str = "location_samples";
    /// Every enter/exit/dwell transition.
    pub const GEOFENCE_EVENTS: &str = "geofence_events";
}

/// Kind of mutation applied to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Insert or replace the row named by the payload's `id`.
    Insert,
    /// Merge payload fields into matching rows.
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

impl Condition {
    fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            Comparison::Eq => actual == &self.value,
            Comparison::Ne => actual != &self.value,
            Comparison::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            Comparison::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
        }
    }
}

/// Strings compare lexically, numbers numerically; anything else is unordered.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

/// Conjunction of field conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq("id", id.into())
    }

    fn push(mut self, field: &str, op: Comparison, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::Eq, value)
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::Ne, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::Lt, value)
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::Gt, value)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// The `id` this filter pins, if it has an equality condition on it.
    pub fn pinned_id(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.field == "id" && c.op == Comparison::Eq)
            .and_then(|c| c.value.as_str())
    }
}

/// Row storage.
///
/// `write` returns the number of affected rows. Conditional transitions use
/// a filter that includes the expected current state and treat `0` as "lost
/// the race".
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, table: &str, filter: &Filter) -> Result<Vec<Row>>;

    async fn write(
        &self,
        table: &str,
        op: OpType,
        payload: &Value,
        filter: Option<&Filter>,
    ) -> Result<usize>;
}

/// Serialize a model into a row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "expected an object row, got {other}"
        ))),
    }
}

/// Deserialize a row into a model.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Read and decode every matching row.
pub async fn read_all<T: DeserializeOwned>(
    store: &dyn Storage,
    table: &str,
    filter: &Filter,
) -> Result<Vec<T>> {
    store
        .read(table, filter)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

/// Read a single row by id.
pub async fn read_one<T: DeserializeOwned>(
    store: &dyn Storage,
    table: &str,
    id: &str,
) -> Result<Option<T>> {
    store
        .read(table, &Filter::by_id(id))
        .await?
        .into_iter()
        .next()
        .map(from_row)
        .transpose()
}

/// Insert or replace a model row.
pub async fn insert<T: Serialize>(store: &dyn Storage, table: &str, value: &T) -> Result<()> {
    let row = to_row(value)?;
    store
        .write(table, OpType::Insert, &Value::Object(row), None)
        .await?;
    Ok(())
}

/// Merge `fields` into rows matching `filter`, returning how many changed.
pub async fn update_where(
    store: &dyn Storage,
    table: &str,
    fields: Value,
    filter: &Filter,
) -> Result<usize> {
    store.write(table, OpType::Update, &fields, Some(filter)).await
}
