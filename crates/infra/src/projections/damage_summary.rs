use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{AggregateId, WarehouseId};
use stocklot_damage::SupplierDamageEvent;
use stocklot_events::EventEnvelope;
use stocklot_partners::PartyId;

use crate::read_model::WarehouseStore;

/// One still-pending damage record in the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDamageRecord {
    pub record_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Pending damage per supplier, the read model behind the damage summary
/// and the aggregator's supplier discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDamageSummary {
    pub supplier_id: PartyId,
    pub records: Vec<PendingDamageRecord>,
}

impl PendingDamageSummary {
    /// Pending quantity per product, descending by quantity.
    pub fn by_product(&self) -> Vec<(ProductId, i64)> {
        let mut sums: HashMap<ProductId, i64> = HashMap::new();
        for record in &self.records {
            *sums.entry(record.product_id).or_insert(0) += record.quantity;
        }
        let mut grouped: Vec<_> = sums.into_iter().collect();
        grouped.sort_by_key(|(product_id, quantity)| (std::cmp::Reverse(*quantity), *product_id));
        grouped
    }

    pub fn total_pending(&self) -> i64 {
        self.records.iter().map(|r| r.quantity).sum()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum DamageProjectionError {
    #[error("failed to deserialize damage event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Pending damage projection.
///
/// Tracks only `Pending` records: a `ReturnQueued` event removes its
/// records from the summary, so the aggregator's discovery pass never
/// re-reads already-batched damage.
#[derive(Debug)]
pub struct DamageSummaryProjection<S>
where
    S: WarehouseStore<PartyId, PendingDamageSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> DamageSummaryProjection<S>
where
    S: WarehouseStore<PartyId, PendingDamageSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        warehouse_id: WarehouseId,
        supplier_id: &PartyId,
    ) -> Option<PendingDamageSummary> {
        self.store.get(warehouse_id, supplier_id)
    }

    /// All suppliers with pending damage in a warehouse.
    pub fn list(&self, warehouse_id: WarehouseId) -> Vec<PendingDamageSummary> {
        self.store
            .list(warehouse_id)
            .into_iter()
            .filter(|s| !s.records.is_empty())
            .collect()
    }

    /// Apply a published envelope into the projection. Idempotent for
    /// at-least-once delivery.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DamageProjectionError> {
        if envelope.aggregate_type() != "damage.supplier" {
            return Ok(());
        }

        let warehouse_id = envelope.warehouse_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(cursors) => cursors,
            Err(_) => return Ok(()),
        };
        let key = CursorKey {
            warehouse_id,
            aggregate_id: envelope.aggregate_id(),
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq == 0 {
            return Err(DamageProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(DamageProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: SupplierDamageEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DamageProjectionError::Deserialize(e.to_string()))?;

        match event {
            SupplierDamageEvent::DamageRecorded(e) => {
                let mut summary = self
                    .store
                    .get(warehouse_id, &e.supplier_id)
                    .unwrap_or(PendingDamageSummary {
                        supplier_id: e.supplier_id,
                        records: Vec::new(),
                    });
                summary.records.push(PendingDamageRecord {
                    record_id: e.record.record_id,
                    product_id: e.record.product_id,
                    quantity: e.record.quantity,
                });
                self.store.upsert(warehouse_id, e.supplier_id, summary);
            }
            SupplierDamageEvent::ReturnQueued(e) => {
                let supplier_id = PartyId::new(e.damage_id.0);
                if let Some(mut summary) = self.store.get(warehouse_id, &supplier_id) {
                    summary
                        .records
                        .retain(|r| !e.record_ids.contains(&r.record_id));
                    self.store.upsert(warehouse_id, supplier_id, summary);
                }
            }
        }

        cursors.insert(key, seq);

        Ok(())
    }
}
