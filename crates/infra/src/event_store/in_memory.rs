use std::collections::HashMap;
use std::sync::RwLock;

use stocklot_core::{AggregateId, WarehouseId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single lock over all streams makes
/// `append_batch` naturally atomic: every version check runs before any
/// event lands.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Validate one batch's internal consistency and return its stream key
    /// and aggregate type.
    fn validate_batch(events: &[UncommittedEvent]) -> Result<(StreamKey, String), EventStoreError> {
        let warehouse_id = events[0].warehouse_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.warehouse_id != warehouse_id {
                return Err(EventStoreError::WarehouseIsolation(format!(
                    "batch contains multiple warehouse_ids (index {idx})"
                )));
            }
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

        Ok((
            StreamKey {
                warehouse_id,
                aggregate_id,
            },
            aggregate_type,
        ))
    }
}

impl EventStore for InMemoryEventStore {
    fn append_batch(
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

        // Per-batch validation before touching the streams.
        let mut keyed = Vec::with_capacity(batches.len());
        for batch in batches {
            let (key, aggregate_type) = Self::validate_batch(&batch.events)?;
            if keyed.iter().any(|(k, _, _)| *k == key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "duplicate stream in batch: {}",
                    key.aggregate_id
                )));
            }
            keyed.push((key, aggregate_type, batch));
        }

        // All streams of one commit share a warehouse.
        let warehouse_id = keyed[0].0.warehouse_id;
        if keyed.iter().any(|(k, _, _)| k.warehouse_id != warehouse_id) {
            return Err(EventStoreError::WarehouseIsolation(
                "batch spans multiple warehouses".to_string(),
            ));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Phase 1: every version and type check must pass before phase 2
        // appends anything, so a conflict on any stream aborts the whole
        // commit with nothing persisted.
        for (key, aggregate_type, batch) in &keyed {
            let stream = streams.get(key).map(Vec::as_slice).unwrap_or_default();
            let current = Self::current_version(stream);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "expected {:?}, found {current}",
                    batch.expected_version
                )));
            }
            if let Some(existing) = stream.first() {
                if existing.aggregate_type != *aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        // Phase 2: assign sequence numbers and append (append-only).
        let mut committed = Vec::new();
        for (key, _, batch) in keyed {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    warehouse_id: e.warehouse_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            warehouse_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}
