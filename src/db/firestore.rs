// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed [`Storage`].
//!
//! Each table is a collection and each row a document keyed by the row's
//! `id`. Equality and range conditions are pushed down to Firestore; every
//! condition is re-checked locally so that `ne` keeps the in-memory
//! semantics (Firestore's `!=` skips documents missing the field).
//!
//! Filtered updates and deletes run inside a transaction: the matching
//! documents are read with the transaction's consistency selector, so a
//! concurrent writer that changed one of them makes the commit fail and the
//! whole read-check-write is retried against fresh data.

use crate::db::{Comparison, Condition, Filter, OpType, Row, Storage};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use firestore::select_filter_builder::FirestoreQueryFilterBuilder;
use firestore::{FirestoreConsistencySelector, FirestoreDb, FirestoreQueryFilter, FirestoreValue};
use serde_json::Value;

/// Commit attempts for one filtered write before giving up.
const TRANSACTION_ATTEMPTS: u32 = 5;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a disconnected client. Every operation fails with a
    /// transient database error, which is what the sync queue expects
    /// from an unreachable backend.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        query_in(self.get_client()?, table, filter).await
    }

    async fn put(&self, table: &str, id: &str, row: &Row) -> Result<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(table)
            .document_id(id)
            .object(row)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Update or delete every row matching `filter`, atomically.
    async fn write_matching(
        &self,
        table: &str,
        op: OpType,
        fields: &Row,
        filter: &Filter,
    ) -> Result<usize> {
        let mut attempt = 1;
        loop {
            match self.write_matching_once(table, op, fields, filter).await {
                Ok(affected) => return Ok(affected),
                Err(e) if e.is_transient() && attempt < TRANSACTION_ATTEMPTS => {
                    tracing::debug!(table, attempt, error = %e, "Transaction failed; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_matching_once(
        &self,
        table: &str,
        op: OpType,
        fields: &Row,
        filter: &Filter,
    ) -> Result<usize> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Reads through this handle join the transaction.
        let tx_db = client.clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
            transaction.transaction_id().clone(),
        ));
        let targets = match query_in(&tx_db, table, filter).await {
            Ok(targets) => targets,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(e);
            }
        };
        if targets.is_empty() {
            let _ = transaction.rollback().await;
            return Ok(0);
        }

        for mut row in targets.iter().cloned() {
            let id = row_id(&row)?;
            match op {
                OpType::Update => {
                    for (key, value) in fields {
                        row.insert(key.clone(), value.clone());
                    }
                    client
                        .fluent()
                        .update()
                        .in_col(table)
                        .document_id(&id)
                        .object(&row)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!("Failed to add update to transaction: {}", e))
                        })?;
                }
                _ => {
                    client
                        .fluent()
                        .delete()
                        .from(table)
                        .document_id(&id)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!("Failed to add delete to transaction: {}", e))
                        })?;
                }
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(targets.len())
    }
}

async fn query_in(client: &FirestoreDb, table: &str, filter: &Filter) -> Result<Vec<Row>> {
    let pushed: Vec<Condition> = filter
        .conditions
        .iter()
        .filter(|c| c.op != Comparison::Ne)
        .cloned()
        .collect();
    for condition in &pushed {
        if matches!(condition.value, Value::Array(_) | Value::Object(_)) {
            return Err(AppError::BadRequest(format!(
                "unsupported filter value for field {}",
                condition.field
            )));
        }
    }

    let query = client.fluent().select().from(table);
    let rows: Vec<Row> = if pushed.is_empty() {
        query.obj::<Row>().query().await
    } else {
        query
            .filter(move |q| {
                let filters: Vec<_> = pushed.iter().map(|c| condition_filter(&q, c)).collect();
                q.for_all(filters)
            })
            .obj::<Row>()
            .query()
            .await
    }
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(rows.into_iter().filter(|row| filter.matches(row)).collect())
}

fn condition_filter(q: &FirestoreQueryFilterBuilder, c: &Condition) -> Option<FirestoreQueryFilter> {
    let field = q.field(c.field.as_str());
    let value: FirestoreValue = match &c.value {
        Value::Null => return field.is_null(),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        Value::Array(_) | Value::Object(_) => return None,
    };
    match c.op {
        Comparison::Eq => field.eq(value),
        Comparison::Lt => field.less_than(value),
        Comparison::Gt => field.greater_than(value),
        Comparison::Ne => None,
    }
}

fn row_id(row: &Row) -> Result<String> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("row is missing a string id".to_string()))
}

#[async_trait]
impl Storage for FirestoreStore {
    async fn read(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.query(table, filter).await
    }

    async fn write(
        &self,
        table: &str,
        op: OpType,
        payload: &Value,
        filter: Option<&Filter>,
    ) -> Result<usize> {
        let Value::Object(fields) = payload else {
            return Err(AppError::BadRequest("payload must be an object".to_string()));
        };

        if op == OpType::Insert {
            let id = row_id(fields)?;
            self.put(table, &id, fields).await?;
            return Ok(1);
        }

        let filter = match filter {
            Some(filter) => filter.clone(),
            None => Filter::by_id(row_id(fields)?),
        };
        self.write_matching(table, op, fields, &filter).await
    }
}
