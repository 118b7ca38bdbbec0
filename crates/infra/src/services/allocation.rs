//! Allocation (picking) order operations.
//!
//! Completion is the all-or-nothing path: every line is evaluated against
//! its product's stock (quantity first, serial availability second)
//! before anything commits. One failing line rejects the whole order and
//! mutates nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use stocklot_catalogue::{Catalogue, ProductId};
use stocklot_core::{
    ActorId, AggregateId, DomainError, WarehouseId, code::PICKING_PREFIX, reference_code,
};
use stocklot_events::{EventBus, EventEnvelope};
use stocklot_partners::{PartnerDirectory, PartyId};
use stocklot_picking::{
    AddOrderLine, AllocationOrder, AllocationOrderCommand, AllocationOrderId, CancelOrder,
    CompleteOrder, LineFill, OpenOrder, OrderPurpose,
};
use stocklot_stock::{
    AllocateStock, MovementRef, ProductStock, ProductStockCommand, ProductStockEvent,
    ProductStockId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::unit_of_work::UnitOfWork;

use super::{ORDER_AGGREGATE_TYPE, STOCK_AGGREGATE_TYPE, with_conflict_retry};

/// Allocation order service.
pub struct AllocationService<S, B> {
    dispatcher: CommandDispatcher<Arc<S>, Arc<B>>,
    catalogue: Arc<dyn Catalogue>,
    partners: Arc<dyn PartnerDirectory>,
}

impl<S, B> AllocationService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: Arc<S>,
        bus: Arc<B>,
        catalogue: Arc<dyn Catalogue>,
        partners: Arc<dyn PartnerDirectory>,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            catalogue,
            partners,
        }
    }

    /// Open a Pending allocation order.
    #[instrument(skip(self), fields(%warehouse_id, %party_id, ?purpose), err)]
    pub fn create_allocation_order(
        &self,
        warehouse_id: WarehouseId,
        party_id: PartyId,
        purpose: OrderPurpose,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<AllocationOrderId, DispatchError> {
        let party_known = match purpose {
            OrderPurpose::SupplierReturn => self.partners.supplier_exists(party_id),
            OrderPurpose::Dispatch => {
                self.partners.customer_exists(party_id) || self.partners.supplier_exists(party_id)
            }
        };
        if !party_known {
            return Err(DomainError::reference_not_found(format!("party {party_id}")).into());
        }

        let order_id = AllocationOrderId::new(AggregateId::new());
        self.dispatcher.dispatch(
            warehouse_id,
            order_id.0,
            ORDER_AGGREGATE_TYPE,
            AllocationOrderCommand::OpenOrder(OpenOrder {
                warehouse_id,
                order_id,
                code: reference_code(PICKING_PREFIX, order_id.0.as_uuid()),
                party_id,
                purpose,
                created_by: actor_id,
                occurred_at: now,
            }),
            |id| AllocationOrder::empty(AllocationOrderId::new(id)),
        )?;
        Ok(order_id)
    }

    /// Add a requested line to a Pending order.
    #[instrument(skip(self), fields(%warehouse_id, %order_id, %product_id), err)]
    pub fn add_allocation_line(
        &self,
        warehouse_id: WarehouseId,
        order_id: AllocationOrderId,
        product_id: ProductId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Uuid, DispatchError> {
        if !self.catalogue.product_exists(product_id) {
            return Err(DomainError::reference_not_found(format!("product {product_id}")).into());
        }

        let line_id = Uuid::now_v7();
        with_conflict_retry("add_allocation_line", || {
            self.dispatcher.dispatch(
                warehouse_id,
                order_id.0,
                ORDER_AGGREGATE_TYPE,
                AllocationOrderCommand::AddOrderLine(AddOrderLine {
                    warehouse_id,
                    order_id,
                    line_id,
                    product_id,
                    quantity,
                    occurred_at: now,
                }),
                |id| AllocationOrder::empty(AllocationOrderId::new(id)),
            )
        })?;
        Ok(line_id)
    }

    /// Complete an order: allocate every line FIFO and fill it.
    ///
    /// Returns the fills (computed unit price + assigned serials per
    /// line). Fails, persisting nothing, if any line cannot be covered;
    /// `InsufficientStock` and `InsufficientSerialUnits` stay distinct.
    #[instrument(skip(self), fields(%warehouse_id, %order_id), err)]
    pub fn complete_allocation_order(
        &self,
        warehouse_id: WarehouseId,
        order_id: AllocationOrderId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LineFill>, DispatchError> {
        with_conflict_retry("complete_allocation_order", || {
            let mut uow = UnitOfWork::new(self.dispatcher.store(), warehouse_id);
            let mut order: AllocationOrder = uow.load(order_id.0, ORDER_AGGREGATE_TYPE, |id| {
                AllocationOrder::empty(AllocationOrderId::new(id))
            })?;
            if !order.is_opened() {
                return Err(DomainError::reference_not_found(format!("order {order_id}")).into());
            }

            // Evaluate every line before committing any of them.
            let lines = order.lines().to_vec();
            let mut fills = Vec::with_capacity(lines.len());
            for line in &lines {
                let stock_id = ProductStockId::for_product(line.product_id);
                let mut stock: ProductStock =
                    uow.load(stock_id.0, STOCK_AGGREGATE_TYPE, |id| {
                        ProductStock::empty(ProductStockId::new(id))
                    })?;
                if !stock.is_opened() {
                    // Never received: zero stock available.
                    return Err(DomainError::insufficient_stock(line.quantity, 0).into());
                }

                let events = uow.execute(
                    &mut stock,
                    stock_id.0,
                    &ProductStockCommand::AllocateStock(AllocateStock {
                        warehouse_id,
                        stock_id,
                        allocation_line_id: line.line_id,
                        quantity: line.quantity,
                        reference: MovementRef::allocation_line(line.line_id),
                        actor_id,
                        occurred_at: now,
                    }),
                )?;

                let allocated = events
                    .iter()
                    .find_map(|e| match e {
                        ProductStockEvent::StockAllocated(a) => Some(a.clone()),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        DomainError::invariant("allocation produced no StockAllocated event")
                    })?;

                fills.push(LineFill {
                    line_id: line.line_id,
                    unit_price: allocated.unit_price,
                    serials: allocated.serial_ids,
                });
            }

            uow.execute(
                &mut order,
                order_id.0,
                &AllocationOrderCommand::CompleteOrder(CompleteOrder {
                    warehouse_id,
                    order_id,
                    fills: fills.clone(),
                    actor_id,
                    occurred_at: now,
                }),
            )?;

            uow.commit(self.dispatcher.bus())?;
            Ok(fills)
        })
    }

    /// Cancel a Pending order. Pure status transition, no ledger effect.
    #[instrument(skip(self), fields(%warehouse_id, %order_id), err)]
    pub fn cancel_allocation_order(
        &self,
        warehouse_id: WarehouseId,
        order_id: AllocationOrderId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry("cancel_allocation_order", || {
            self.dispatcher.dispatch(
                warehouse_id,
                order_id.0,
                ORDER_AGGREGATE_TYPE,
                AllocationOrderCommand::CancelOrder(CancelOrder {
                    warehouse_id,
                    order_id,
                    actor_id,
                    occurred_at: now,
                }),
                |id| AllocationOrder::empty(AllocationOrderId::new(id)),
            )
        })?;
        Ok(())
    }
}
