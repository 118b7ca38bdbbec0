use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use stocklot_events::Event;
use stocklot_partners::PartyId;

/// Quantity at which accumulated damage for one (supplier, product) group
/// stops waiting and becomes a batched supplier return.
pub const RETURN_THRESHOLD: i64 = 20;

/// Supplier damage stream identifier. By convention this is the supplier's
/// own uuid, so callers can address the stream without a lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierDamageId(pub AggregateId);

impl SupplierDamageId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_supplier(supplier_id: PartyId) -> Self {
        Self(supplier_id.0)
    }
}

impl core::fmt::Display for SupplierDamageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Where a damage record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageSourceKind {
    Receipt,
    StockCount,
}

/// Source document a damage record points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DamageSource {
    pub kind: DamageSourceKind,
    pub id: Uuid,
}

impl DamageSource {
    pub fn receipt(id: Uuid) -> Self {
        Self {
            kind: DamageSourceKind::Receipt,
            id,
        }
    }

    pub fn stock_count(id: Uuid) -> Self {
        Self {
            kind: DamageSourceKind::StockCount,
            id,
        }
    }
}

/// Lifecycle of a damage record: `Pending` until folded into a generated
/// return order, then `Queued`. Never mutated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageStatus {
    Pending,
    Queued,
}

/// One recognized portion of damaged stock awaiting a supplier return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRecord {
    pub record_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub source: DamageSource,
    pub status: DamageStatus,
    pub discovered_at: DateTime<Utc>,
    pub return_order_id: Option<Uuid>,
}

/// One product group folded into a return order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedProduct {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: SupplierDamage.
///
/// One stream per (warehouse, supplier), accumulating every damage record
/// attributed to that supplier across all sources. This is what turns a
/// stream of small damage events into batched supplier returns instead of
/// a return per discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierDamage {
    id: SupplierDamageId,
    warehouse_id: Option<WarehouseId>,
    supplier_id: Option<PartyId>,
    records: Vec<DamageRecord>,
    version: u64,
    created: bool,
}

impl SupplierDamage {
    /// Create an empty aggregate instance for rehydration. The stream is
    /// initialized by its first recorded damage.
    pub fn empty(id: SupplierDamageId) -> Self {
        Self {
            id,
            warehouse_id: None,
            supplier_id: None,
            records: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SupplierDamageId {
        self.id
    }

    pub fn supplier_id(&self) -> Option<PartyId> {
        self.supplier_id
    }

    pub fn records(&self) -> &[DamageRecord] {
        &self.records
    }

    pub fn pending_records(&self) -> impl Iterator<Item = &DamageRecord> {
        self.records
            .iter()
            .filter(|r| r.status == DamageStatus::Pending)
    }

    /// Pending quantity per product, for groups whose sum reached the
    /// threshold. Sorted by product id so return-order lines come out in a
    /// stable order.
    pub fn qualifying_returns(&self, threshold: i64) -> Vec<QueuedProduct> {
        let mut sums: std::collections::BTreeMap<ProductId, i64> = std::collections::BTreeMap::new();
        for record in self.pending_records() {
            *sums.entry(record.product_id).or_insert(0) += record.quantity;
        }
        sums.into_iter()
            .filter(|(_, quantity)| *quantity >= threshold)
            .map(|(product_id, quantity)| QueuedProduct {
                product_id,
                quantity,
            })
            .collect()
    }

    fn record_for_source(&self, source: &DamageSource, product_id: ProductId) -> Option<&DamageRecord> {
        self.records
            .iter()
            .find(|r| r.source == *source && r.product_id == product_id)
    }
}

impl AggregateRoot for SupplierDamage {
    type Id = SupplierDamageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordDamage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDamage {
    pub warehouse_id: WarehouseId,
    pub damage_id: SupplierDamageId,
    pub supplier_id: PartyId,
    pub record_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub source: DamageSource,
    pub occurred_at: DateTime<Utc>,
}

/// Command: QueueForReturn.
///
/// Folds every qualifying product group into the given return order. A
/// no-op (empty event list) when nothing qualifies, which is what makes
/// the aggregator safely re-entrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueForReturn {
    pub warehouse_id: WarehouseId,
    pub damage_id: SupplierDamageId,
    pub return_order_id: Uuid,
    pub threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplierDamageCommand {
    RecordDamage(RecordDamage),
    QueueForReturn(QueueForReturn),
}

/// Event: DamageRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRecorded {
    pub warehouse_id: WarehouseId,
    pub damage_id: SupplierDamageId,
    pub supplier_id: PartyId,
    pub record: DamageRecord,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnQueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnQueued {
    pub warehouse_id: WarehouseId,
    pub damage_id: SupplierDamageId,
    pub return_order_id: Uuid,
    pub record_ids: Vec<Uuid>,
    pub products: Vec<QueuedProduct>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplierDamageEvent {
    DamageRecorded(DamageRecorded),
    ReturnQueued(ReturnQueued),
}

impl Event for SupplierDamageEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SupplierDamageEvent::DamageRecorded(_) => "damage.supplier.recorded",
            SupplierDamageEvent::ReturnQueued(_) => "damage.supplier.return_queued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SupplierDamageEvent::DamageRecorded(e) => e.occurred_at,
            SupplierDamageEvent::ReturnQueued(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SupplierDamage {
    type Command = SupplierDamageCommand;
    type Event = SupplierDamageEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SupplierDamageEvent::DamageRecorded(e) => {
                self.id = e.damage_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.supplier_id = Some(e.supplier_id);
                self.records.push(e.record.clone());
                self.created = true;
            }
            SupplierDamageEvent::ReturnQueued(e) => {
                for record in &mut self.records {
                    if e.record_ids.contains(&record.record_id) {
                        record.status = DamageStatus::Queued;
                        record.return_order_id = Some(e.return_order_id);
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SupplierDamageCommand::RecordDamage(cmd) => self.handle_record(cmd),
            SupplierDamageCommand::QueueForReturn(cmd) => self.handle_queue(cmd),
        }
    }
}

impl SupplierDamage {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_damage_id(&self, damage_id: SupplierDamageId) -> Result<(), DomainError> {
        if self.id != damage_id {
            return Err(DomainError::invariant("damage_id mismatch"));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordDamage) -> Result<Vec<SupplierDamageEvent>, DomainError> {
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_damage_id(cmd.damage_id)?;

        if self.created && self.supplier_id != Some(cmd.supplier_id) {
            return Err(DomainError::invariant("supplier mismatch"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "damaged quantity must be positive, got {}",
                cmd.quantity
            )));
        }

        // One record per (source, product): re-running a reconciliation
        // must not double-create damage.
        if self.record_for_source(&cmd.source, cmd.product_id).is_some() {
            return Err(DomainError::duplicate_reconciliation(format!(
                "damage for product {} from source {:?} already recorded",
                cmd.product_id, cmd.source
            )));
        }

        let record = DamageRecord {
            record_id: cmd.record_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            reason: cmd.reason.clone(),
            source: cmd.source,
            status: DamageStatus::Pending,
            discovered_at: cmd.occurred_at,
            return_order_id: None,
        };

        Ok(vec![SupplierDamageEvent::DamageRecorded(DamageRecorded {
            warehouse_id: cmd.warehouse_id,
            damage_id: cmd.damage_id,
            supplier_id: cmd.supplier_id,
            record,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_queue(&self, cmd: &QueueForReturn) -> Result<Vec<SupplierDamageEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::reference_not_found(
                "no damage recorded for this supplier",
            ));
        }
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_damage_id(cmd.damage_id)?;

        if cmd.threshold <= 0 {
            return Err(DomainError::validation("threshold must be positive"));
        }

        let products = self.qualifying_returns(cmd.threshold);
        if products.is_empty() {
            return Ok(vec![]);
        }

        let record_ids: Vec<Uuid> = self
            .pending_records()
            .filter(|r| products.iter().any(|p| p.product_id == r.product_id))
            .map(|r| r.record_id)
            .collect();

        Ok(vec![SupplierDamageEvent::ReturnQueued(ReturnQueued {
            warehouse_id: cmd.warehouse_id,
            damage_id: cmd.damage_id,
            return_order_id: cmd.return_order_id,
            record_ids,
            products,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_warehouse_id() -> WarehouseId {
        WarehouseId::new()
    }

    fn test_supplier_id() -> PartyId {
        PartyId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn drive(damage: &mut SupplierDamage, cmd: SupplierDamageCommand) -> Vec<SupplierDamageEvent> {
        let events = damage.handle(&cmd).unwrap();
        for event in &events {
            damage.apply(event);
        }
        events
    }

    fn setup() -> (SupplierDamage, WarehouseId, PartyId) {
        let supplier_id = test_supplier_id();
        let damage = SupplierDamage::empty(SupplierDamageId::for_supplier(supplier_id));
        (damage, test_warehouse_id(), supplier_id)
    }

    fn record(
        damage: &mut SupplierDamage,
        warehouse_id: WarehouseId,
        supplier_id: PartyId,
        product_id: ProductId,
        quantity: i64,
        source: DamageSource,
    ) {
        drive(
            damage,
            SupplierDamageCommand::RecordDamage(RecordDamage {
                warehouse_id,
                damage_id: damage.id_typed(),
                supplier_id,
                record_id: Uuid::now_v7(),
                product_id,
                quantity,
                reason: Some("crushed carton".to_string()),
                source,
                occurred_at: Utc::now(),
            }),
        );
    }

    fn queue(
        damage: &mut SupplierDamage,
        warehouse_id: WarehouseId,
        return_order_id: Uuid,
    ) -> Vec<SupplierDamageEvent> {
        drive(
            damage,
            SupplierDamageCommand::QueueForReturn(QueueForReturn {
                warehouse_id,
                damage_id: damage.id_typed(),
                return_order_id,
                threshold: RETURN_THRESHOLD,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn records_below_threshold_stay_pending() {
        let (mut damage, warehouse_id, supplier_id) = setup();
        let product = test_product_id();

        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            product,
            12,
            DamageSource::receipt(Uuid::now_v7()),
        );

        let events = queue(&mut damage, warehouse_id, Uuid::now_v7());
        assert!(events.is_empty());
        assert_eq!(damage.pending_records().count(), 1);
    }

    #[test]
    fn threshold_batches_records_into_one_return() {
        let (mut damage, warehouse_id, supplier_id) = setup();
        let product = test_product_id();

        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            product,
            12,
            DamageSource::receipt(Uuid::now_v7()),
        );
        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            product,
            9,
            DamageSource::stock_count(Uuid::now_v7()),
        );

        let return_order_id = Uuid::now_v7();
        let events = queue(&mut damage, warehouse_id, return_order_id);

        assert_eq!(events.len(), 1);
        match &events[0] {
            SupplierDamageEvent::ReturnQueued(e) => {
                assert_eq!(e.return_order_id, return_order_id);
                assert_eq!(e.record_ids.len(), 2);
                assert_eq!(e.products.len(), 1);
                assert_eq!(e.products[0].quantity, 21);
            }
            other => panic!("expected ReturnQueued, got {other:?}"),
        }

        assert_eq!(damage.pending_records().count(), 0);
        for rec in damage.records() {
            assert_eq!(rec.status, DamageStatus::Queued);
            assert_eq!(rec.return_order_id, Some(return_order_id));
        }
    }

    #[test]
    fn queued_records_never_requalify() {
        let (mut damage, warehouse_id, supplier_id) = setup();
        let product = test_product_id();

        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            product,
            25,
            DamageSource::receipt(Uuid::now_v7()),
        );
        let first = queue(&mut damage, warehouse_id, Uuid::now_v7());
        assert_eq!(first.len(), 1);

        // Re-running the aggregator finds nothing new.
        let second = queue(&mut damage, warehouse_id, Uuid::now_v7());
        assert!(second.is_empty());
    }

    #[test]
    fn only_qualifying_products_are_queued() {
        let (mut damage, warehouse_id, supplier_id) = setup();
        let heavy = test_product_id();
        let light = test_product_id();

        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            heavy,
            22,
            DamageSource::receipt(Uuid::now_v7()),
        );
        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            light,
            3,
            DamageSource::receipt(Uuid::now_v7()),
        );

        let events = queue(&mut damage, warehouse_id, Uuid::now_v7());
        match &events[0] {
            SupplierDamageEvent::ReturnQueued(e) => {
                assert_eq!(e.products.len(), 1);
                assert_eq!(e.products[0].product_id, heavy);
            }
            other => panic!("expected ReturnQueued, got {other:?}"),
        }

        // The light product's record is still waiting for more volume.
        assert_eq!(damage.pending_records().count(), 1);
        assert_eq!(damage.pending_records().next().unwrap().product_id, light);
    }

    #[test]
    fn same_source_and_product_cannot_be_recorded_twice() {
        let (mut damage, warehouse_id, supplier_id) = setup();
        let product = test_product_id();
        let receipt = Uuid::now_v7();

        record(
            &mut damage,
            warehouse_id,
            supplier_id,
            product,
            5,
            DamageSource::receipt(receipt),
        );

        let err = damage
            .handle(&SupplierDamageCommand::RecordDamage(RecordDamage {
                warehouse_id,
                damage_id: damage.id_typed(),
                supplier_id,
                record_id: Uuid::now_v7(),
                product_id: product,
                quantity: 5,
                reason: None,
                source: DamageSource::receipt(receipt),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateReconciliation(_)));
        assert_eq!(damage.records().len(), 1);
    }
}
