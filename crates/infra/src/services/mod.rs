//! Application services exposing the ledger core's operations.
//!
//! Each mutating operation runs as one unit of work with a bounded
//! optimistic-conflict retry loop: the read-plan-write sequence of the
//! FIFO engine re-runs against the fresh stream head whenever a concurrent
//! writer got there first.

pub mod allocation;
pub mod damage;
pub mod queries;
pub mod receiving;
pub mod stocktake;

pub use allocation::AllocationService;
pub use damage::DamageService;
pub use queries::StockQueries;
pub use receiving::{LineReconciliation, ReceivingService, ReconcileOutcome};
pub use stocktake::StocktakeService;

use serde::de::DeserializeOwned;

use stocklot_core::{Aggregate, AggregateId, WarehouseId};

use crate::command_dispatcher::{DispatchError, apply_history, validate_loaded_stream};
use crate::event_store::EventStore;

pub(crate) const STOCK_AGGREGATE_TYPE: &str = "stock.product";
pub(crate) const RECEIPT_AGGREGATE_TYPE: &str = "receiving.receipt";
pub(crate) const ORDER_AGGREGATE_TYPE: &str = "picking.order";
pub(crate) const DAMAGE_AGGREGATE_TYPE: &str = "damage.supplier";
pub(crate) const COUNT_AGGREGATE_TYPE: &str = "stocktake.count";

const MAX_CONFLICT_RETRIES: u32 = 5;

/// Re-run `f` while it fails with an optimistic concurrency conflict, up
/// to a small bound. Every other outcome passes through unchanged.
pub(crate) fn with_conflict_retry<T>(
    operation: &'static str,
    mut f: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut attempt = 1u32;
    loop {
        match f() {
            Err(DispatchError::Concurrency(conflict)) if attempt < MAX_CONFLICT_RETRIES => {
                tracing::debug!(operation, attempt, %conflict, "optimistic conflict, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Load and rehydrate an aggregate outside a unit of work (queries).
pub(crate) fn rehydrate<A, S>(
    store: &S,
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce(AggregateId) -> A,
) -> Result<A, DispatchError>
where
    S: EventStore,
    A: Aggregate,
    A::Event: stocklot_events::Event + DeserializeOwned,
{
    let history = store.load_stream(warehouse_id, aggregate_id)?;
    validate_loaded_stream(warehouse_id, aggregate_id, &history)?;
    let mut aggregate = make_aggregate(aggregate_id);
    apply_history::<A>(&mut aggregate, &history)?;
    Ok(aggregate)
}
