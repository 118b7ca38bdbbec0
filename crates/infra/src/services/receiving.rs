//! Goods-receipt operations: open, line management, reconciliation,
//! cancellation.
//!
//! Reconciliation is the heavy operation: recording a delivery's actuals,
//! accepting the good portion as a lot (with serials and an `In` ledger
//! entry), recording the damaged portion as a pending damage record, and,
//! on the first damage per receipt, synthesizing the supplier return
//! order and the Draft replacement receipt. All of it commits as one
//! atomic batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use stocklot_catalogue::Catalogue;
use stocklot_core::{
    ActorId, AggregateId, DomainError, WarehouseId,
    code::{RECEIPT_PREFIX, RETURN_PREFIX},
    reference_code,
};
use stocklot_damage::{
    DamageSource, RecordDamage, SupplierDamage, SupplierDamageCommand, SupplierDamageId,
};
use stocklot_events::{EventBus, EventEnvelope};
use stocklot_partners::PartnerDirectory;
use stocklot_picking::{
    AddOrderLine, AllocationOrder, AllocationOrderCommand, AllocationOrderId, OpenOrder,
    OrderPurpose,
};
use stocklot_receiving::{
    AddReceiptLine, CancelReceipt, MarkDamageSynthesized, OpenReceipt, ReceiptCommand,
    ReceiptOrder, ReceiptOrderId, ReceiptStatus, RecordLineActuals,
};
use stocklot_stock::{
    LotId, MovementRef, OpenProductStock, ProductStock, ProductStockCommand, ProductStockId,
    ReceiveLot, SerialId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::unit_of_work::UnitOfWork;

use super::{
    DAMAGE_AGGREGATE_TYPE, ORDER_AGGREGATE_TYPE, RECEIPT_AGGREGATE_TYPE, STOCK_AGGREGATE_TYPE,
    with_conflict_retry,
};

/// One delivery's reconciled quantities for one receipt line.
#[derive(Debug, Clone)]
pub struct LineReconciliation {
    pub line_id: Uuid,
    pub actual_good: i64,
    pub actual_damaged: i64,
    pub damage_reason: Option<String>,
    pub cost_override: Option<i64>,
}

/// What a reconciliation produced.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub receipt_status: Option<ReceiptStatus>,
    /// Lots created for good stock, per line.
    pub lots: Vec<(Uuid, LotId)>,
    /// Pending damage records created.
    pub damage_records: Vec<Uuid>,
    /// Supplier return order, when this reconciliation was the receipt's
    /// first damage.
    pub return_order_id: Option<AllocationOrderId>,
    /// Draft replacement receipt, created together with the return order.
    pub replacement_receipt_id: Option<ReceiptOrderId>,
}

/// Receiving reconciliation service.
pub struct ReceivingService<S, B> {
    dispatcher: CommandDispatcher<Arc<S>, Arc<B>>,
    catalogue: Arc<dyn Catalogue>,
    partners: Arc<dyn PartnerDirectory>,
}

impl<S, B> ReceivingService<S, B>
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

    /// Open a Draft receipt against a supplier.
    #[instrument(skip(self), fields(%warehouse_id, %supplier_id), err)]
    pub fn open_receipt(
        &self,
        warehouse_id: WarehouseId,
        supplier_id: stocklot_partners::PartyId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<ReceiptOrderId, DispatchError> {
        if !self.partners.supplier_exists(supplier_id) {
            return Err(DomainError::reference_not_found(format!("supplier {supplier_id}")).into());
        }

        let receipt_id = ReceiptOrderId::new(AggregateId::new());
        self.dispatcher.dispatch(
            warehouse_id,
            receipt_id.0,
            RECEIPT_AGGREGATE_TYPE,
            ReceiptCommand::OpenReceipt(OpenReceipt {
                warehouse_id,
                receipt_id,
                code: reference_code(RECEIPT_PREFIX, receipt_id.0.as_uuid()),
                supplier_id,
                created_by: actor_id,
                occurred_at: now,
            }),
            |id| ReceiptOrder::empty(ReceiptOrderId::new(id)),
        )?;
        Ok(receipt_id)
    }

    /// Add a declared line to a Draft receipt.
    #[instrument(skip(self), fields(%warehouse_id, %receipt_id, %product_id), err)]
    pub fn add_receipt_line(
        &self,
        warehouse_id: WarehouseId,
        receipt_id: ReceiptOrderId,
        product_id: stocklot_catalogue::ProductId,
        quantity_expected: i64,
        line_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<Uuid, DispatchError> {
        if !self.catalogue.product_exists(product_id) {
            return Err(DomainError::reference_not_found(format!("product {product_id}")).into());
        }

        let line_id = Uuid::now_v7();
        with_conflict_retry("add_receipt_line", || {
            self.dispatcher.dispatch(
                warehouse_id,
                receipt_id.0,
                RECEIPT_AGGREGATE_TYPE,
                ReceiptCommand::AddReceiptLine(AddReceiptLine {
                    warehouse_id,
                    receipt_id,
                    line_id,
                    product_id,
                    quantity_expected,
                    line_cost,
                    occurred_at: now,
                }),
                |id| ReceiptOrder::empty(ReceiptOrderId::new(id)),
            )
        })?;
        Ok(line_id)
    }

    /// Reconcile one delivery against one line.
    #[instrument(skip(self, reconciliation), fields(%warehouse_id, %receipt_id), err)]
    pub fn reconcile_line(
        &self,
        warehouse_id: WarehouseId,
        receipt_id: ReceiptOrderId,
        reconciliation: LineReconciliation,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, DispatchError> {
        self.reconcile_receipt(warehouse_id, receipt_id, vec![reconciliation], actor_id, now)
    }

    /// Reconcile one delivery covering several lines, atomically.
    ///
    /// Every step (line actuals, lot creation, serial minting, damage
    /// records, return/replacement synthesis) commits in one batch; a
    /// failure in any line persists nothing.
    #[instrument(skip(self, reconciliations), fields(%warehouse_id, %receipt_id, line_count = reconciliations.len()), err)]
    pub fn reconcile_receipt(
        &self,
        warehouse_id: WarehouseId,
        receipt_id: ReceiptOrderId,
        reconciliations: Vec<LineReconciliation>,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, DispatchError> {
        if reconciliations.is_empty() {
            return Err(DomainError::validation("nothing to reconcile").into());
        }

        with_conflict_retry("reconcile_receipt", || {
            let mut uow = UnitOfWork::new(self.dispatcher.store(), warehouse_id);
            let mut receipt: ReceiptOrder =
                uow.load(receipt_id.0, RECEIPT_AGGREGATE_TYPE, |id| {
                    ReceiptOrder::empty(ReceiptOrderId::new(id))
                })?;
            if !receipt.is_opened() {
                return Err(
                    DomainError::reference_not_found(format!("receipt {receipt_id}")).into(),
                );
            }

            let mut outcome = ReconcileOutcome::default();

            // 1) Record every delivery line on the receipt.
            for item in &reconciliations {
                uow.execute(
                    &mut receipt,
                    receipt_id.0,
                    &ReceiptCommand::RecordLineActuals(RecordLineActuals {
                        warehouse_id,
                        receipt_id,
                        line_id: item.line_id,
                        actual_good: item.actual_good,
                        actual_damaged: item.actual_damaged,
                        damage_reason: item.damage_reason.clone(),
                        cost_override: item.cost_override,
                        actor_id,
                        occurred_at: now,
                    }),
                )?;
            }

            let supplier_id = receipt
                .supplier_id()
                .ok_or_else(|| DomainError::invariant("receipt has no supplier"))?;

            // 2) Accept the good portions as lots.
            for item in reconciliations.iter().filter(|i| i.actual_good > 0) {
                let lot_id =
                    self.accept_good_stock(&mut uow, &receipt, item, actor_id, now)?;
                outcome.lots.push((item.line_id, lot_id));
            }

            // 3) Record the damaged portions against the supplier.
            let damaged: Vec<&LineReconciliation> = reconciliations
                .iter()
                .filter(|i| i.actual_damaged > 0)
                .collect();
            if !damaged.is_empty() {
                let damage_id = SupplierDamageId::for_supplier(supplier_id);
                let mut damage: SupplierDamage =
                    uow.load(damage_id.0, DAMAGE_AGGREGATE_TYPE, |id| {
                        SupplierDamage::empty(SupplierDamageId::new(id))
                    })?;
                let source = DamageSource::receipt(*receipt_id.0.as_uuid());

                for item in &damaged {
                    let line = receipt.line(item.line_id).ok_or_else(|| {
                        DomainError::reference_not_found(format!("line {}", item.line_id))
                    })?;
                    // Idempotency guard: re-reconciling the same receipt
                    // never double-creates damage for a product.
                    let already = damage
                        .records()
                        .iter()
                        .any(|r| r.source == source && r.product_id == line.product_id);
                    if already {
                        continue;
                    }
                    let record_id = Uuid::now_v7();
                    uow.execute(
                        &mut damage,
                        damage_id.0,
                        &SupplierDamageCommand::RecordDamage(RecordDamage {
                            warehouse_id,
                            damage_id,
                            supplier_id,
                            record_id,
                            product_id: line.product_id,
                            quantity: item.actual_damaged,
                            reason: item.damage_reason.clone(),
                            source,
                            occurred_at: now,
                        }),
                    )?;
                    outcome.damage_records.push(record_id);
                }

                // 4) First damage on this receipt: synthesize the supplier
                // return order and the Draft replacement receipt.
                if !receipt.damage_synthesized() {
                    let (return_order_id, replacement_receipt_id) =
                        self.synthesize_return_and_replacement(&mut uow, &receipt, actor_id, now)?;
                    uow.execute(
                        &mut receipt,
                        receipt_id.0,
                        &ReceiptCommand::MarkDamageSynthesized(MarkDamageSynthesized {
                            warehouse_id,
                            receipt_id,
                            return_order_id: *return_order_id.0.as_uuid(),
                            replacement_receipt_id: *replacement_receipt_id.0.as_uuid(),
                            occurred_at: now,
                        }),
                    )?;
                    outcome.return_order_id = Some(return_order_id);
                    outcome.replacement_receipt_id = Some(replacement_receipt_id);
                }
            }

            outcome.receipt_status = Some(receipt.status());
            uow.commit(self.dispatcher.bus())?;
            Ok(outcome)
        })
    }

    /// Cancel a Draft/Partial receipt. Pure status transition.
    #[instrument(skip(self), fields(%warehouse_id, %receipt_id), err)]
    pub fn cancel_receipt(
        &self,
        warehouse_id: WarehouseId,
        receipt_id: ReceiptOrderId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        with_conflict_retry("cancel_receipt", || {
            self.dispatcher.dispatch(
                warehouse_id,
                receipt_id.0,
                RECEIPT_AGGREGATE_TYPE,
                ReceiptCommand::CancelReceipt(CancelReceipt {
                    warehouse_id,
                    receipt_id,
                    actor_id,
                    occurred_at: now,
                }),
                |id| ReceiptOrder::empty(ReceiptOrderId::new(id)),
            )
        })?;
        Ok(())
    }

    fn accept_good_stock(
        &self,
        uow: &mut UnitOfWork<'_, Arc<S>>,
        receipt: &ReceiptOrder,
        item: &LineReconciliation,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<LotId, DispatchError> {
        let warehouse_id = uow.warehouse_id();
        let line = receipt
            .line(item.line_id)
            .ok_or_else(|| DomainError::reference_not_found(format!("line {}", item.line_id)))?;
        let product = self.catalogue.product(line.product_id).ok_or_else(|| {
            DomainError::reference_not_found(format!("product {}", line.product_id))
        })?;

        let stock_id = ProductStockId::for_product(line.product_id);
        let mut stock: ProductStock = uow.load(stock_id.0, STOCK_AGGREGATE_TYPE, |id| {
            ProductStock::empty(ProductStockId::new(id))
        })?;
        if !stock.is_opened() {
            uow.execute(
                &mut stock,
                stock_id.0,
                &ProductStockCommand::OpenProductStock(OpenProductStock {
                    warehouse_id,
                    stock_id,
                    product_id: line.product_id,
                    product_code: product.code.as_str().to_string(),
                    serial_tracked: product.serial_tracked,
                    occurred_at: now,
                }),
            )?;
        }

        let lot_id = LotId::new();
        let serial_ids: Vec<SerialId> = if product.serial_tracked {
            (0..item.actual_good).map(|_| SerialId::new()).collect()
        } else {
            Vec::new()
        };

        uow.execute(
            &mut stock,
            stock_id.0,
            &ProductStockCommand::ReceiveLot(ReceiveLot {
                warehouse_id,
                stock_id,
                lot_id,
                source_line_id: Some(item.line_id),
                quantity: item.actual_good,
                cost_total: line.cost_share(item.actual_good),
                receipt_code: receipt.code().to_string(),
                serial_ids,
                reference: MovementRef::receipt_line(item.line_id),
                actor_id,
                occurred_at: now,
            }),
        )?;

        Ok(lot_id)
    }

    fn synthesize_return_and_replacement(
        &self,
        uow: &mut UnitOfWork<'_, Arc<S>>,
        receipt: &ReceiptOrder,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<(AllocationOrderId, ReceiptOrderId), DispatchError> {
        let warehouse_id = uow.warehouse_id();
        let supplier_id = receipt
            .supplier_id()
            .ok_or_else(|| DomainError::invariant("receipt has no supplier"))?;

        let damaged_lines: Vec<_> = receipt
            .lines()
            .iter()
            .filter(|l| l.actual_damaged > 0)
            .cloned()
            .collect();

        // Return order: the damaged quantities go back to the supplier.
        let return_order_id = AllocationOrderId::new(AggregateId::new());
        let mut return_order: AllocationOrder =
            uow.load(return_order_id.0, ORDER_AGGREGATE_TYPE, |id| {
                AllocationOrder::empty(AllocationOrderId::new(id))
            })?;
        uow.execute(
            &mut return_order,
            return_order_id.0,
            &AllocationOrderCommand::OpenOrder(OpenOrder {
                warehouse_id,
                order_id: return_order_id,
                code: reference_code(RETURN_PREFIX, return_order_id.0.as_uuid()),
                party_id: supplier_id,
                purpose: OrderPurpose::SupplierReturn,
                created_by: actor_id,
                occurred_at: now,
            }),
        )?;
        for line in &damaged_lines {
            uow.execute(
                &mut return_order,
                return_order_id.0,
                &AllocationOrderCommand::AddOrderLine(AddOrderLine {
                    warehouse_id,
                    order_id: return_order_id,
                    line_id: Uuid::now_v7(),
                    product_id: line.product_id,
                    quantity: line.actual_damaged,
                    occurred_at: now,
                }),
            )?;
        }

        // Replacement receipt: a Draft expecting the supplier to re-ship
        // the damaged quantities.
        let replacement_id = ReceiptOrderId::new(AggregateId::new());
        let mut replacement: ReceiptOrder =
            uow.load(replacement_id.0, RECEIPT_AGGREGATE_TYPE, |id| {
                ReceiptOrder::empty(ReceiptOrderId::new(id))
            })?;
        uow.execute(
            &mut replacement,
            replacement_id.0,
            &ReceiptCommand::OpenReceipt(OpenReceipt {
                warehouse_id,
                receipt_id: replacement_id,
                code: reference_code(RECEIPT_PREFIX, replacement_id.0.as_uuid()),
                supplier_id,
                created_by: actor_id,
                occurred_at: now,
            }),
        )?;
        for line in &damaged_lines {
            uow.execute(
                &mut replacement,
                replacement_id.0,
                &ReceiptCommand::AddReceiptLine(AddReceiptLine {
                    warehouse_id,
                    receipt_id: replacement_id,
                    line_id: Uuid::now_v7(),
                    product_id: line.product_id,
                    quantity_expected: line.actual_damaged,
                    line_cost: line.cost_share(line.actual_damaged),
                    occurred_at: now,
                }),
            )?;
        }

        Ok((return_order_id, replacement_id))
    }
}
