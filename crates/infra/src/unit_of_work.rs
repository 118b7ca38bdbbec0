//! Multi-aggregate unit of work.
//!
//! An operation like "complete this allocation order" decides events
//! against several streams (the order plus one product stock per line) and
//! must commit them as one atomic unit: all lines succeed or nothing is
//! persisted. The unit of work accumulates decided events per stream and
//! commits through the store's `append_batch`, expecting each stream to
//! still be at the version it was loaded at. Any concurrent writer fails
//! the whole commit, and the caller re-runs the operation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stocklot_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, WarehouseId};
use stocklot_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{
    DispatchError, apply_history, stream_version, validate_loaded_stream,
};
use crate::event_store::{EventStore, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug)]
struct StreamState {
    aggregate_id: AggregateId,
    aggregate_type: String,
    base_version: u64,
    pending: Vec<UncommittedEvent>,
}

/// Accumulates events across aggregates for one atomic commit.
#[derive(Debug)]
pub struct UnitOfWork<'a, S> {
    store: &'a S,
    warehouse_id: WarehouseId,
    streams: Vec<StreamState>,
}

impl<'a, S> UnitOfWork<'a, S>
where
    S: EventStore,
{
    pub fn new(store: &'a S, warehouse_id: WarehouseId) -> Self {
        Self {
            store,
            warehouse_id,
            streams: Vec::new(),
        }
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    /// Load and rehydrate an aggregate, registering its stream.
    ///
    /// The stream's version is pinned at first load; events already
    /// decided in this unit of work are replayed on top, so re-loading an
    /// aggregate observes its in-flight state.
    pub fn load<A>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: stocklot_events::Event + DeserializeOwned,
    {
        let history = self.store.load_stream(self.warehouse_id, aggregate_id)?;
        validate_loaded_stream(self.warehouse_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        match self
            .streams
            .iter()
            .position(|s| s.aggregate_id == aggregate_id)
        {
            Some(idx) => {
                for pending in &self.streams[idx].pending {
                    let ev: A::Event = serde_json::from_value(pending.payload.clone())
                        .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
                    aggregate.apply(&ev);
                }
            }
            None => {
                self.streams.push(StreamState {
                    aggregate_id,
                    aggregate_type: aggregate_type.to_string(),
                    base_version: stream_version(&history),
                    pending: Vec::new(),
                });
            }
        }

        Ok(aggregate)
    }

    /// Handle a command on a loaded aggregate and stage the decided
    /// events for commit. The aggregate is advanced in place so later
    /// commands in the same unit of work see the new state.
    pub fn execute<A>(
        &mut self,
        aggregate: &mut A,
        aggregate_id: AggregateId,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stocklot_events::Event + Serialize,
    {
        let decided = aggregate.handle(command).map_err(DispatchError::from)?;

        let warehouse_id = self.warehouse_id;
        let state = self
            .stream_mut(aggregate_id)
            .ok_or_else(|| DispatchError::Store(crate::event_store::EventStoreError::InvalidAppend(
                format!("aggregate {aggregate_id} was not loaded in this unit of work"),
            )))?;

        for ev in &decided {
            state.pending.push(UncommittedEvent::from_typed(
                warehouse_id,
                aggregate_id,
                state.aggregate_type.clone(),
                Uuid::now_v7(),
                ev,
            )?);
            aggregate.apply(ev);
        }

        Ok(decided)
    }

    /// Whether any stream has staged events.
    pub fn is_dirty(&self) -> bool {
        self.streams.iter().any(|s| !s.pending.is_empty())
    }

    /// Commit every staged stream atomically, then publish.
    ///
    /// Publication happens after the append; the store is the source of
    /// truth and consumers are idempotent, so a publish failure after a
    /// successful append only delays the read models.
    pub fn commit<B>(self, bus: &B) -> Result<Vec<StoredEvent>, DispatchError>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let batches: Vec<StreamAppend> = self
            .streams
            .into_iter()
            .filter(|s| !s.pending.is_empty())
            .map(|s| StreamAppend {
                events: s.pending,
                expected_version: ExpectedVersion::Exact(s.base_version),
            })
            .collect();

        if batches.is_empty() {
            return Ok(vec![]);
        }

        let committed = self.store.append_batch(batches)?;

        for stored in &committed {
            bus.publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    fn stream_mut(&mut self, aggregate_id: AggregateId) -> Option<&mut StreamState> {
        self.streams
            .iter_mut()
            .find(|s| s.aggregate_id == aggregate_id)
    }
}
