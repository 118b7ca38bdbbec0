//! Postgres-backed event store implementation.
//!
//! Persists events in an append-only `events` table with warehouse
//! isolation and optimistic concurrency enforced at the database level.
//! A multi-stream `append_batch` runs inside one transaction, which is
//! what gives cross-aggregate operations their single-commit semantics.
//!
//! Concurrent appends race on the unique
//! `(warehouse_id, aggregate_id, sequence_number)` constraint; a loser
//! surfaces as `EventStoreError::Concurrency` and the caller retries
//! against the fresh stream head.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use stocklot_core::{AggregateId, WarehouseId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Uses the SQLx connection pool (thread-safe, `Send + Sync`). The sync
/// [`EventStore`] trait is bridged with the current tokio runtime handle,
/// so calls must come from within a tokio runtime context.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Load all events for a warehouse + aggregate stream, in sequence
    /// number order. Returns an empty vector for an unknown stream.
    #[instrument(
        skip(self),
        fields(
            warehouse_id = %warehouse_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid()
        ),
        err
    )]
    pub async fn load_stream_async(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                warehouse_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE warehouse_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let mut stored_events = Vec::with_capacity(rows.len());
        for row in rows {
            stored_events.push(stored_event_from_row(&row)?);
        }

        Ok(stored_events)
    }

    /// Append to several streams inside one transaction.
    ///
    /// Every stream's version check runs before any insert is committed;
    /// a conflict anywhere rolls the whole transaction back.
    #[instrument(skip(self, batches), fields(stream_count = batches.len()), err)]
    pub async fn append_batch_async(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<StreamAppend> = batches
            .into_iter()
            .filter(|b| !b.events.is_empty())
            .collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let warehouse_id = batches[0].events[0].warehouse_id;
        for batch in &batches {
            for e in &batch.events {
                if e.warehouse_id != warehouse_id {
                    return Err(EventStoreError::WarehouseIsolation(
                        "batch spans multiple warehouses".to_string(),
                    ));
                }
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::new();
        for batch in batches {
            match append_stream(&mut tx, batch).await {
                Ok(mut stored) => committed.append(&mut stored),
                Err(err) => {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn append_stream(
    tx: &mut Transaction<'_, Postgres>,
    batch: StreamAppend,
) -> Result<Vec<StoredEvent>, EventStoreError> {
    let warehouse_id = batch.events[0].warehouse_id;
    let aggregate_id = batch.events[0].aggregate_id;
    let aggregate_type = batch.events[0].aggregate_type.clone();

    for (idx, e) in batch.events.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    let (current_version, existing_type) =
        check_stream_version(tx, warehouse_id, aggregate_id).await?;

    if let Some(existing) = existing_type {
        if existing != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
            )));
        }
    }

    if !batch.expected_version.matches(current_version) {
        return Err(EventStoreError::Concurrency(format!(
            "optimistic concurrency check failed: expected {:?}, found {current_version}",
            batch.expected_version
        )));
    }

    let mut stored_events = Vec::with_capacity(batch.events.len());
    let mut next_sequence = current_version + 1;

    for event in batch.events {
        sqlx::query(
            r#"
            INSERT INTO events (
                event_id,
                warehouse_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id)
        .bind(warehouse_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .bind(&aggregate_type)
        .bind(next_sequence as i64)
        .bind(&event.event_type)
        .bind(event.event_version as i32)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                // Another transaction won the race for this position.
                EventStoreError::Concurrency(format!(
                    "concurrent append detected: sequence_number {next_sequence} already exists"
                ))
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        let stored = StoredEvent {
            event_id: event.event_id,
            warehouse_id: event.warehouse_id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            sequence_number: next_sequence,
            event_type: event.event_type,
            event_version: event.event_version,
            occurred_at: event.occurred_at,
            payload: event.payload,
        };
        stored_events.push(stored);
        next_sequence += 1;
    }

    Ok(stored_events)
}

/// Current version of a stream, 0 if it does not exist yet.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) as current_version,
            MAX(aggregate_type) as aggregate_type
        FROM events
        WHERE warehouse_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(warehouse_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row.try_get("current_version").map_err(|e| {
        EventStoreError::InvalidAppend(format!("failed to read current_version: {e}"))
    })?;
    let aggregate_type: Option<String> = row.try_get("aggregate_type").map_err(|e| {
        EventStoreError::InvalidAppend(format!("failed to read aggregate_type: {e}"))
    })?;

    Ok((current_version.unwrap_or(0) as u64, aggregate_type))
}

fn stored_event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| {
        EventStoreError::InvalidAppend(format!("failed to deserialize event row: {e}"))
    };

    let event_id: uuid::Uuid = row.try_get("event_id").map_err(read)?;
    let warehouse_id: uuid::Uuid = row.try_get("warehouse_id").map_err(read)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(read)?;
    let aggregate_type: String = row.try_get("aggregate_type").map_err(read)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_type: String = row.try_get("event_type").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;
    let payload: serde_json::Value = row.try_get("payload").map_err(read)?;

    Ok(StoredEvent {
        event_id,
        warehouse_id: WarehouseId::from_uuid(warehouse_id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type,
        sequence_number: sequence_number as u64,
        event_type,
        event_version: event_version as u32,
        occurred_at,
        payload,
    })
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: concurrent append on the same position.
                Some("23505") => EventStoreError::Concurrency(msg),
                _ => EventStoreError::InvalidAppend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::InvalidAppend(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::InvalidAppend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

impl EventStore for PostgresEventStore {
    fn append_batch(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // The EventStore trait is synchronous; bridge into the ambient
        // tokio runtime (present when called from server handlers).
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::InvalidAppend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        handle.block_on(self.append_batch_async(batches))
    }

    fn load_stream(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::InvalidAppend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        handle.block_on(self.load_stream_async(warehouse_id, aggregate_id))
    }
}
