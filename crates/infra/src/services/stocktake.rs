//! Stock-count operations: open, submit, approve.
//!
//! Approval is the reconciliation pass: per line, the counted damage is
//! written off first, the system quantity is read net of that write-off,
//! and the remaining variance is adjusted. Afterwards the damage
//! aggregator runs for every supplier the count touched. The whole
//! approval is one atomic batch; a failure on any line persists nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use stocklot_catalogue::Catalogue;
use stocklot_core::{
    ActorId, AggregateId, DomainError, WarehouseId, code::STOCK_COUNT_PREFIX, reference_code,
};
use stocklot_damage::{DamageSource, RecordDamage, SupplierDamage, SupplierDamageCommand, SupplierDamageId};
use stocklot_events::{EventBus, EventEnvelope};
use stocklot_partners::PartyId;
use stocklot_stock::{
    AdjustVariance, DeductDamaged, LotId, MovementRef, OpenProductStock, ProductStock,
    ProductStockCommand, ProductStockId,
};
use stocklot_stocktake::{
    ApproveCount, CountedLine, LineComputation, OpenCount, StockCount, StockCountCommand,
    StockCountId, StockCountStatus, SubmitCount,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{DamageSummaryProjection, PendingDamageSummary};
use crate::read_model::WarehouseStore;
use crate::unit_of_work::UnitOfWork;

use super::damage::queue_supplier_return;
use super::{COUNT_AGGREGATE_TYPE, DAMAGE_AGGREGATE_TYPE, STOCK_AGGREGATE_TYPE, with_conflict_retry};

/// Stock-count reconciliation service.
pub struct StocktakeService<S, B, D>
where
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    dispatcher: CommandDispatcher<Arc<S>, Arc<B>>,
    catalogue: Arc<dyn Catalogue>,
    summary: Arc<DamageSummaryProjection<D>>,
}

impl<S, B, D> StocktakeService<S, B, D>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    pub fn new(
        store: Arc<S>,
        bus: Arc<B>,
        catalogue: Arc<dyn Catalogue>,
        summary: Arc<DamageSummaryProjection<D>>,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            catalogue,
            summary,
        }
    }

    /// Open a Pending stock count.
    #[instrument(skip(self), fields(%warehouse_id), err)]
    pub fn open_stock_count(
        &self,
        warehouse_id: WarehouseId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<StockCountId, DispatchError> {
        let count_id = StockCountId::new(AggregateId::new());
        self.dispatcher.dispatch(
            warehouse_id,
            count_id.0,
            COUNT_AGGREGATE_TYPE,
            StockCountCommand::OpenCount(OpenCount {
                warehouse_id,
                count_id,
                code: reference_code(STOCK_COUNT_PREFIX, count_id.0.as_uuid()),
                created_by: actor_id,
                occurred_at: now,
            }),
            |id| StockCount::empty(StockCountId::new(id)),
        )?;
        Ok(count_id)
    }

    /// Submit a worker's raw counts (Pending → Submitted).
    #[instrument(skip(self, lines), fields(%warehouse_id, %count_id, line_count = lines.len()), err)]
    pub fn submit_stock_count(
        &self,
        warehouse_id: WarehouseId,
        count_id: StockCountId,
        lines: Vec<CountedLine>,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        for line in &lines {
            if !self.catalogue.product_exists(line.product_id) {
                return Err(
                    DomainError::reference_not_found(format!("product {}", line.product_id))
                        .into(),
                );
            }
        }

        with_conflict_retry("submit_stock_count", || {
            self.dispatcher.dispatch(
                warehouse_id,
                count_id.0,
                COUNT_AGGREGATE_TYPE,
                StockCountCommand::SubmitCount(SubmitCount {
                    warehouse_id,
                    count_id,
                    lines: lines.clone(),
                    submitted_by: actor_id,
                    occurred_at: now,
                }),
                |id| StockCount::empty(StockCountId::new(id)),
            )
        })?;
        Ok(())
    }

    /// Approve a submitted count (Submitted → Completed, terminal).
    ///
    /// Per line: write off counted damage FIFO, read the system quantity
    /// net of that write-off, post one variance adjustment. Then the
    /// damage aggregator runs for the touched suppliers inside the same
    /// commit. Returns the per-line computations.
    #[instrument(skip(self), fields(%warehouse_id, %count_id), err)]
    pub fn approve_stock_count(
        &self,
        warehouse_id: WarehouseId,
        count_id: StockCountId,
        actor_id: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<LineComputation>, DispatchError> {
        with_conflict_retry("approve_stock_count", || {
            let mut uow = UnitOfWork::new(self.dispatcher.store(), warehouse_id);
            let mut count: StockCount = uow.load(count_id.0, COUNT_AGGREGATE_TYPE, |id| {
                StockCount::empty(StockCountId::new(id))
            })?;
            if !count.is_opened() {
                return Err(
                    DomainError::reference_not_found(format!("stock count {count_id}")).into(),
                );
            }
            match count.status() {
                StockCountStatus::Submitted => {}
                StockCountStatus::Pending => {
                    return Err(DomainError::validation(
                        "stock count must be submitted before approval",
                    )
                    .into());
                }
                StockCountStatus::Completed => {
                    return Err(DomainError::already_finalized(format!(
                        "stock count {} is completed",
                        count.code()
                    ))
                    .into());
                }
            }

            let lines = count.lines().to_vec();
            let mut computed = Vec::with_capacity(lines.len());
            let mut touched_suppliers: Vec<PartyId> = Vec::new();

            for line in &lines {
                let product = self.catalogue.product(line.product_id).ok_or_else(|| {
                    DomainError::reference_not_found(format!("product {}", line.product_id))
                })?;

                let stock_id = ProductStockId::for_product(line.product_id);
                let mut stock: ProductStock =
                    uow.load(stock_id.0, STOCK_AGGREGATE_TYPE, |id| {
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

                // Damage first.
                if line.actual_damaged > 0 {
                    uow.execute(
                        &mut stock,
                        stock_id.0,
                        &ProductStockCommand::DeductDamaged(DeductDamaged {
                            warehouse_id,
                            stock_id,
                            quantity: line.actual_damaged,
                            reference: MovementRef::stock_count(*count_id.0.as_uuid()),
                            actor_id,
                            occurred_at: now,
                        }),
                    )?;

                    match product.default_supplier {
                        Some(supplier_id) => {
                            let damage_id = SupplierDamageId::for_supplier(supplier_id);
                            let mut damage: SupplierDamage =
                                uow.load(damage_id.0, DAMAGE_AGGREGATE_TYPE, |id| {
                                    SupplierDamage::empty(SupplierDamageId::new(id))
                                })?;
                            uow.execute(
                                &mut damage,
                                damage_id.0,
                                &SupplierDamageCommand::RecordDamage(RecordDamage {
                                    warehouse_id,
                                    damage_id,
                                    supplier_id,
                                    record_id: Uuid::now_v7(),
                                    product_id: line.product_id,
                                    quantity: line.actual_damaged,
                                    reason: None,
                                    source: DamageSource::stock_count(*count_id.0.as_uuid()),
                                    occurred_at: now,
                                }),
                            )?;
                            if !touched_suppliers.contains(&supplier_id) {
                                touched_suppliers.push(supplier_id);
                            }
                        }
                        None => {
                            tracing::warn!(
                                %warehouse_id,
                                product_id = %line.product_id,
                                quantity = line.actual_damaged,
                                "counted damage has no supplier to attribute it to"
                            );
                        }
                    }
                }

                // Then variance, measured against the post-write-off
                // balance.
                let system_quantity = stock.balance();
                let variance = line.actual_good - system_quantity;
                if variance != 0 {
                    uow.execute(
                        &mut stock,
                        stock_id.0,
                        &ProductStockCommand::AdjustVariance(AdjustVariance {
                            warehouse_id,
                            stock_id,
                            delta: variance,
                            fallback_lot_id: LotId::new(),
                            reference: MovementRef::stock_count(*count_id.0.as_uuid()),
                            actor_id,
                            occurred_at: now,
                        }),
                    )?;
                }

                computed.push(LineComputation {
                    product_id: line.product_id,
                    system_quantity,
                    variance,
                });
            }

            uow.execute(
                &mut count,
                count_id.0,
                &StockCountCommand::ApproveCount(ApproveCount {
                    warehouse_id,
                    count_id,
                    computed: computed.clone(),
                    approved_by: actor_id,
                    occurred_at: now,
                }),
            )?;

            // Run the damage aggregator inside the same commit, covering
            // the suppliers this count touched plus anyone the summary
            // already shows as pending.
            for summary in self.summary.list(warehouse_id) {
                if !touched_suppliers.contains(&summary.supplier_id) {
                    touched_suppliers.push(summary.supplier_id);
                }
            }
            for supplier_id in touched_suppliers {
                queue_supplier_return(&mut uow, supplier_id, actor_id, now)?;
            }

            uow.commit(self.dispatcher.bus())?;
            Ok(computed)
        })
    }
}
