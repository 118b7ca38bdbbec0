//! Command execution pipeline for event-sourced aggregates.
//!
//! The dispatcher runs the single-aggregate lifecycle: load history,
//! rehydrate, handle the command, append with an optimistic version check,
//! publish the committed events. Multi-aggregate operations (order
//! completion, receipt reconciliation, stock-count approval) go through
//! [`crate::unit_of_work::UnitOfWork`] instead, which shares the helpers
//! defined here.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stocklot_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, WarehouseId};
use stocklot_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Dispatch-layer error.
///
/// Domain failures pass through unflattened so callers can still tell
/// `InsufficientStock` from `InsufficientSerialUnits`; the remediation
/// differs, and that distinction is the whole point of the taxonomy.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure; the operation can be retried
    /// against the fresh stream head.
    #[error("optimistic concurrency conflict: {0}")]
    Concurrency(String),

    /// Warehouse isolation violation (cross-warehouse stream mixing).
    #[error("warehouse isolation violation: {0}")]
    WarehouseIsolation(String),

    /// Deterministic domain failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Failed to deserialize historical event payloads.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once;
    /// consumers may see the events on a later replay).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::WarehouseIsolation(msg) => {
                DispatchError::WarehouseIsolation(msg.clone())
            }
            _ => DispatchError::Store(value),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory
/// implementations and production swaps in Postgres without touching
/// domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// Loads the stream, rehydrates via `make_aggregate`, decides events,
    /// appends them expecting the loaded version, then publishes. A
    /// concurrent writer shows up as [`DispatchError::Concurrency`];
    /// callers retry by re-dispatching.
    pub fn dispatch<A>(
        &self,
        warehouse_id: WarehouseId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stocklot_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (warehouse-scoped)
        let history = self.store.load_stream(warehouse_id, aggregate_id)?;
        validate_loaded_stream(warehouse_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    warehouse_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

pub(crate) fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

pub(crate) fn validate_loaded_stream(
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce isolation even if a buggy backend returns foreign data, and
    // require strictly increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.warehouse_id != warehouse_id {
            return Err(DispatchError::WarehouseIsolation(format!(
                "loaded stream contains wrong warehouse_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::WarehouseIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

pub(crate) fn apply_history<A>(
    aggregate: &mut A,
    history: &[StoredEvent],
) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
