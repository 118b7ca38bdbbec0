use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stocklot_catalogue::ProductId;
use stocklot_core::{AggregateId, WarehouseId};
use stocklot_events::EventEnvelope;
use stocklot_stock::ProductStockEvent;

use crate::read_model::WarehouseStore;

/// Queryable stock read model: current balance per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelReadModel {
    pub product_id: ProductId,
    pub product_code: String,
    pub serial_tracked: bool,
    pub balance: i64,
    /// Sequence of the last ledger entry folded in.
    pub last_entry_seq: u64,
}

/// Warehouse+aggregate cursor to support at-least-once delivery
/// (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("warehouse isolation violation: {0}")]
    WarehouseIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock level projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a
/// warehouse-isolated read model. Read models are disposable and
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: WarehouseStore<ProductId, StockLevelReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: WarehouseStore<ProductId, StockLevelReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the read model for one warehouse/product.
    pub fn get(
        &self,
        warehouse_id: WarehouseId,
        product_id: &ProductId,
    ) -> Option<StockLevelReadModel> {
        self.store.get(warehouse_id, product_id)
    }

    /// List all products for a warehouse.
    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<StockLevelReadModel> {
        self.store.list(warehouse_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces warehouse isolation
    /// - Enforces monotonic sequence per stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are
    ///   ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockProjectionError> {
        if envelope.aggregate_type() != "stock.product" {
            return Ok(());
        }

        let warehouse_id = envelope.warehouse_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(cursors) => cursors,
            Err(_) => return Ok(()),
        };
        let key = CursorKey {
            warehouse_id,
            aggregate_id,
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(StockProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: ProductStockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;

        let event_warehouse = match &event {
            ProductStockEvent::ProductStockOpened(e) => e.warehouse_id,
            ProductStockEvent::LotReceived(e) => e.warehouse_id,
            ProductStockEvent::StockAllocated(e) => e.warehouse_id,
            ProductStockEvent::DamageWrittenOff(e) => e.warehouse_id,
            ProductStockEvent::BalanceAdjusted(e) => e.warehouse_id,
        };
        if event_warehouse != warehouse_id {
            return Err(StockProjectionError::WarehouseIsolation(
                "event warehouse_id does not match envelope warehouse_id".to_string(),
            ));
        }

        match event {
            ProductStockEvent::ProductStockOpened(e) => {
                self.store.upsert(
                    warehouse_id,
                    e.product_id,
                    StockLevelReadModel {
                        product_id: e.product_id,
                        product_code: e.product_code,
                        serial_tracked: e.serial_tracked,
                        balance: 0,
                        last_entry_seq: 0,
                    },
                );
            }
            ProductStockEvent::LotReceived(e) => {
                self.fold_entry(warehouse_id, e.entry.product_id, e.entry.balance_after, e.entry.entry_seq);
            }
            ProductStockEvent::StockAllocated(e) => {
                if let Some(last_entry) = e.entries.last() {
                    self.fold_entry(
                        warehouse_id,
                        last_entry.product_id,
                        last_entry.balance_after,
                        last_entry.entry_seq,
                    );
                }
            }
            ProductStockEvent::DamageWrittenOff(e) => {
                self.fold_entry(warehouse_id, e.entry.product_id, e.entry.balance_after, e.entry.entry_seq);
            }
            ProductStockEvent::BalanceAdjusted(e) => {
                self.fold_entry(warehouse_id, e.entry.product_id, e.entry.balance_after, e.entry.entry_seq);
            }
        }

        // Advance cursor after successful apply.
        cursors.insert(key, seq);

        Ok(())
    }

    fn fold_entry(
        &self,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        balance_after: i64,
        entry_seq: u64,
    ) {
        let mut rm = self
            .store
            .get(warehouse_id, &product_id)
            .unwrap_or(StockLevelReadModel {
                product_id,
                product_code: String::new(),
                serial_tracked: false,
                balance: 0,
                last_entry_seq: 0,
            });
        rm.balance = balance_after;
        rm.last_entry_seq = entry_seq;
        self.store.upsert(warehouse_id, product_id, rm);
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut warehouses = envs.iter().map(|e| e.warehouse_id()).collect::<Vec<_>>();
            warehouses.sort_by_key(|w| *w.as_uuid().as_bytes());
            warehouses.dedup();
            for w in warehouses {
                self.store.clear_warehouse(w);
            }
        }

        // Deterministic replay order: warehouse, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.warehouse_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
