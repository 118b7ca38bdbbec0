//! Damage aggregation: converting accumulated pending damage into batched
//! supplier return orders once a (supplier, product) group crosses the
//! threshold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use stocklot_core::{
    ActorId, AggregateId, DomainError, WarehouseId, code::RETURN_PREFIX, reference_code,
};
use stocklot_damage::{
    QueueForReturn, RETURN_THRESHOLD, SupplierDamage, SupplierDamageCommand, SupplierDamageId,
};
use stocklot_events::{EventBus, EventEnvelope};
use stocklot_partners::PartyId;
use stocklot_picking::{
    AddOrderLine, AllocationOrder, AllocationOrderCommand, AllocationOrderId, OpenOrder,
    OrderPurpose,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{DamageSummaryProjection, PendingDamageSummary};
use crate::read_model::WarehouseStore;
use crate::unit_of_work::UnitOfWork;

use super::{DAMAGE_AGGREGATE_TYPE, ORDER_AGGREGATE_TYPE, with_conflict_retry};

/// Damage aggregator service.
pub struct DamageService<S, B, D>
where
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    dispatcher: CommandDispatcher<Arc<S>, Arc<B>>,
    summary: Arc<DamageSummaryProjection<D>>,
}

impl<S, B, D> DamageService<S, B, D>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    pub fn new(store: Arc<S>, bus: Arc<B>, summary: Arc<DamageSummaryProjection<D>>) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            summary,
        }
    }

    /// Run the aggregator across every supplier with pending damage.
    ///
    /// The summary projection discovers candidates; the supplier's own
    /// stream is the authority re-checked under the commit, so a stale
    /// read model only costs a wasted pass, never a wrong return order.
    /// Re-entrant: already-queued records never re-qualify.
    #[instrument(skip(self), fields(%warehouse_id), err)]
    pub fn check_thresholds(
        &self,
        warehouse_id: WarehouseId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AllocationOrderId>, DispatchError> {
        let suppliers: Vec<PartyId> = self
            .summary
            .list(warehouse_id)
            .into_iter()
            .map(|s| s.supplier_id)
            .collect();
        self.check_suppliers(warehouse_id, &suppliers, actor_id, now)
    }

    /// Run the aggregator for an explicit supplier set.
    #[instrument(skip(self, suppliers), fields(%warehouse_id, supplier_count = suppliers.len()), err)]
    pub fn check_suppliers(
        &self,
        warehouse_id: WarehouseId,
        suppliers: &[PartyId],
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AllocationOrderId>, DispatchError> {
        let mut created = Vec::new();
        for supplier_id in suppliers {
            let order = with_conflict_retry("check_supplier_threshold", || {
                let mut uow = UnitOfWork::new(self.dispatcher.store(), warehouse_id);
                let order = queue_supplier_return(&mut uow, *supplier_id, actor_id, now)?;
                uow.commit(self.dispatcher.bus())?;
                Ok(order)
            })?;
            if let Some(order_id) = order {
                tracing::info!(%warehouse_id, %supplier_id, %order_id, "batched supplier return created");
                created.push(order_id);
            }
        }
        Ok(created)
    }
}

/// Fold a supplier's qualifying pending damage into one return order
/// inside the given unit of work.
///
/// Creates the order (one line per qualifying product, quantity = the
/// group's pending sum) and marks every contributing record Queued,
/// stamped with the order id. Returns `None` when nothing qualifies.
pub(crate) fn queue_supplier_return<S>(
    uow: &mut UnitOfWork<'_, S>,
    supplier_id: PartyId,
    actor_id: ActorId,
    now: DateTime<Utc>,
) -> Result<Option<AllocationOrderId>, DispatchError>
where
    S: EventStore,
{
    let warehouse_id = uow.warehouse_id();
    let damage_id = SupplierDamageId::for_supplier(supplier_id);
    let mut damage: SupplierDamage = uow.load(damage_id.0, DAMAGE_AGGREGATE_TYPE, |id| {
        SupplierDamage::empty(SupplierDamageId::new(id))
    })?;

    let qualifying = damage.qualifying_returns(RETURN_THRESHOLD);
    if qualifying.is_empty() {
        return Ok(None);
    }

    let order_id = AllocationOrderId::new(AggregateId::new());
    let mut order: AllocationOrder = uow.load(order_id.0, ORDER_AGGREGATE_TYPE, |id| {
        AllocationOrder::empty(AllocationOrderId::new(id))
    })?;
    uow.execute(
        &mut order,
        order_id.0,
        &AllocationOrderCommand::OpenOrder(OpenOrder {
            warehouse_id,
            order_id,
            code: reference_code(RETURN_PREFIX, order_id.0.as_uuid()),
            party_id: supplier_id,
            purpose: OrderPurpose::SupplierReturn,
            created_by: actor_id,
            occurred_at: now,
        }),
    )?;
    for group in &qualifying {
        uow.execute(
            &mut order,
            order_id.0,
            &AllocationOrderCommand::AddOrderLine(AddOrderLine {
                warehouse_id,
                order_id,
                line_id: Uuid::now_v7(),
                product_id: group.product_id,
                quantity: group.quantity,
                occurred_at: now,
            }),
        )?;
    }

    let queued = uow.execute(
        &mut damage,
        damage_id.0,
        &SupplierDamageCommand::QueueForReturn(QueueForReturn {
            warehouse_id,
            damage_id,
            return_order_id: *order_id.0.as_uuid(),
            threshold: RETURN_THRESHOLD,
            occurred_at: now,
        }),
    )?;
    if queued.is_empty() {
        return Err(
            DomainError::invariant("threshold qualification drifted during queueing").into(),
        );
    }

    Ok(Some(order_id))
}
