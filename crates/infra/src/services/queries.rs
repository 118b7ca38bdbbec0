//! Read-side operations: balances, ledger history, lot and serial detail,
//! pending damage.
//!
//! Balances, ledger and lot detail read the event streams directly; the
//! stream is the system of record, so these answers are exact at the
//! moment of the read. The pending damage summary comes from its bus-fed
//! read model, which is what can enumerate suppliers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use stocklot_catalogue::ProductId;
use stocklot_core::WarehouseId;
use stocklot_partners::PartyId;
use stocklot_stock::{
    LedgerEntry, Lot, ProductStock, ProductStockEvent, ProductStockId, SerialUnit,
};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::projections::{DamageSummaryProjection, PendingDamageSummary};
use crate::read_model::WarehouseStore;

use super::rehydrate;

/// Read-side service over the ledger core.
pub struct StockQueries<S, D>
where
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    store: Arc<S>,
    damage_summary: Arc<DamageSummaryProjection<D>>,
}

impl<S, D> StockQueries<S, D>
where
    S: EventStore,
    D: WarehouseStore<PartyId, PendingDamageSummary>,
{
    pub fn new(store: Arc<S>, damage_summary: Arc<DamageSummaryProjection<D>>) -> Self {
        Self {
            store,
            damage_summary,
        }
    }

    /// Current balance for a product; 0 when nothing was ever received.
    pub fn inventory_balance(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<i64, DispatchError> {
        Ok(self.load_stock(warehouse_id, product_id)?.balance())
    }

    /// All lots for a product, including depleted ones (audit history).
    pub fn lot_detail(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Vec<Lot>, DispatchError> {
        Ok(self.load_stock(warehouse_id, product_id)?.lots().to_vec())
    }

    /// All serial units for a product.
    pub fn serial_units(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Vec<SerialUnit>, DispatchError> {
        Ok(self
            .load_stock(warehouse_id, product_id)?
            .serials()
            .to_vec())
    }

    /// Ledger entries for a product within an optional time window,
    /// ordered by `(occurred_at, entry_seq)`.
    pub fn ledger(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, DispatchError> {
        let mut entries = self.all_entries(warehouse_id, product_id)?;
        entries.retain(|e| {
            from.is_none_or(|from| e.occurred_at >= from)
                && to.is_none_or(|to| e.occurred_at <= to)
        });
        Ok(entries)
    }

    /// Historical balance: the `balance_after` of the most recent ledger
    /// entry at or before `at`; 0 when no entry precedes it.
    pub fn balance_at(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        at: DateTime<Utc>,
    ) -> Result<i64, DispatchError> {
        let entries = self.all_entries(warehouse_id, product_id)?;
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.occurred_at <= at)
            .map(|e| e.balance_after)
            .unwrap_or(0))
    }

    /// Pending damage per supplier, from the summary read model.
    pub fn pending_damage_summary(&self, warehouse_id: WarehouseId) -> Vec<PendingDamageSummary> {
        self.damage_summary.list(warehouse_id)
    }

    fn load_stock(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<ProductStock, DispatchError> {
        let stock_id = ProductStockId::for_product(product_id);
        rehydrate(self.store.as_ref(), warehouse_id, stock_id.0, |id| {
            ProductStock::empty(ProductStockId::new(id))
        })
    }

    fn all_entries(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Vec<LedgerEntry>, DispatchError> {
        let stock_id = ProductStockId::for_product(product_id);
        let history = self.store.load_stream(warehouse_id, stock_id.0)?;

        let mut entries: Vec<LedgerEntry> = Vec::new();
        for stored in history {
            let event = deserialize_event::<ProductStockEvent>(&stored.payload)?;
            match event {
                ProductStockEvent::ProductStockOpened(_) => {}
                ProductStockEvent::LotReceived(e) => entries.push(e.entry),
                ProductStockEvent::StockAllocated(e) => entries.extend(e.entries),
                ProductStockEvent::DamageWrittenOff(e) => entries.push(e.entry),
                ProductStockEvent::BalanceAdjusted(e) => entries.push(e.entry),
            }
        }

        entries.sort_by_key(|e| (e.occurred_at, e.entry_seq));
        Ok(entries)
    }
}

fn deserialize_event<E: DeserializeOwned>(payload: &serde_json::Value) -> Result<E, DispatchError> {
    serde_json::from_value(payload.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
}
