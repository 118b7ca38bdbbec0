use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use stocklot_events::Event;
use stocklot_partners::PartyId;

/// Goods-receipt order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptOrderId(pub AggregateId);

impl ReceiptOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReceiptOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a receipt. The status is derived from line completeness:
/// all lines complete → Completed, any actuals recorded → Partial,
/// otherwise Draft. Completed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Draft,
    Partial,
    Completed,
    Cancelled,
}

/// One declared product on a receipt.
///
/// Actuals accumulate across deliveries: a partial receipt leaves the line
/// open and a later delivery records the remainder. The line is complete
/// when `actual_good + actual_damaged == quantity_expected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity_expected: i64,
    /// Declared whole-line value, in minor currency units.
    pub line_cost: i64,
    pub actual_good: i64,
    pub actual_damaged: i64,
    pub damage_reason: Option<String>,
    /// Whether any actuals were ever recorded for this line.
    pub touched: bool,
}

impl ReceiptLine {
    pub fn is_complete(&self) -> bool {
        self.actual_good + self.actual_damaged == self.quantity_expected
    }

    pub fn outstanding(&self) -> i64 {
        self.quantity_expected - self.actual_good - self.actual_damaged
    }

    /// Proportional share of the declared line value for `quantity` units.
    ///
    /// Divides by `quantity_expected`: the cost basis is the declared
    /// line total, not whatever fraction actually arrived.
    pub fn cost_share(&self, quantity: i64) -> i64 {
        if self.quantity_expected == 0 {
            return 0;
        }
        ((self.line_cost as i128 * quantity as i128) / self.quantity_expected as i128) as i64
    }
}

/// Aggregate root: ReceiptOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOrder {
    id: ReceiptOrderId,
    warehouse_id: Option<WarehouseId>,
    code: String,
    supplier_id: Option<PartyId>,
    created_by: Option<ActorId>,
    status: ReceiptStatus,
    lines: Vec<ReceiptLine>,
    damage_synthesized: bool,
    version: u64,
    created: bool,
}

impl ReceiptOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ReceiptOrderId) -> Self {
        Self {
            id,
            warehouse_id: None,
            code: String::new(),
            supplier_id: None,
            created_by: None,
            status: ReceiptStatus::Draft,
            lines: Vec::new(),
            damage_synthesized: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptOrderId {
        self.id
    }

    pub fn is_opened(&self) -> bool {
        self.created
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn supplier_id(&self) -> Option<PartyId> {
        self.supplier_id
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn lines(&self) -> &[ReceiptLine] {
        &self.lines
    }

    pub fn line(&self, line_id: Uuid) -> Option<&ReceiptLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    /// Whether the return/replacement pair for this receipt's damage has
    /// already been created.
    pub fn damage_synthesized(&self) -> bool {
        self.damage_synthesized
    }

    fn derive_status(&self) -> ReceiptStatus {
        if self.status == ReceiptStatus::Cancelled {
            return ReceiptStatus::Cancelled;
        }
        if !self.lines.is_empty() && self.lines.iter().all(|l| l.is_complete()) {
            return ReceiptStatus::Completed;
        }
        if self.lines.iter().any(|l| l.touched) {
            return ReceiptStatus::Partial;
        }
        ReceiptStatus::Draft
    }
}

impl AggregateRoot for ReceiptOrder {
    type Id = ReceiptOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReceipt {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub code: String,
    pub supplier_id: PartyId,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddReceiptLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReceiptLine {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity_expected: i64,
    pub line_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordLineActuals.
///
/// Records one delivery's reconciled quantities against a line. Actuals
/// accumulate; `actual_good + actual_damaged` need not reach
/// `quantity_expected`, the remainder simply stays open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLineActuals {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub line_id: Uuid,
    pub actual_good: i64,
    pub actual_damaged: i64,
    pub damage_reason: Option<String>,
    /// Replaces the declared line value from this delivery on.
    pub cost_override: Option<i64>,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDamageSynthesized.
///
/// Stamps the receipt with the return order / replacement receipt pair
/// created for its damage. Guarded: a second attempt fails with
/// `DuplicateReconciliation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDamageSynthesized {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub return_order_id: Uuid,
    pub replacement_receipt_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelReceipt (Draft/Partial only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    OpenReceipt(OpenReceipt),
    AddReceiptLine(AddReceiptLine),
    RecordLineActuals(RecordLineActuals),
    MarkDamageSynthesized(MarkDamageSynthesized),
    CancelReceipt(CancelReceipt),
}

/// Event: ReceiptOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOpened {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub code: String,
    pub supplier_id: PartyId,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLineAdded {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity_expected: i64,
    pub line_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineActualsRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineActualsRecorded {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub actual_good: i64,
    pub actual_damaged: i64,
    pub damage_reason: Option<String>,
    pub cost_override: Option<i64>,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DamageSynthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageSynthesized {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub return_order_id: Uuid,
    pub replacement_receipt_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCancelled {
    pub warehouse_id: WarehouseId,
    pub receipt_id: ReceiptOrderId,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptOpened(ReceiptOpened),
    ReceiptLineAdded(ReceiptLineAdded),
    LineActualsRecorded(LineActualsRecorded),
    DamageSynthesized(DamageSynthesized),
    ReceiptCancelled(ReceiptCancelled),
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptOpened(_) => "receiving.receipt.opened",
            ReceiptEvent::ReceiptLineAdded(_) => "receiving.receipt.line_added",
            ReceiptEvent::LineActualsRecorded(_) => "receiving.receipt.line_actuals_recorded",
            ReceiptEvent::DamageSynthesized(_) => "receiving.receipt.damage_synthesized",
            ReceiptEvent::ReceiptCancelled(_) => "receiving.receipt.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptOpened(e) => e.occurred_at,
            ReceiptEvent::ReceiptLineAdded(e) => e.occurred_at,
            ReceiptEvent::LineActualsRecorded(e) => e.occurred_at,
            ReceiptEvent::DamageSynthesized(e) => e.occurred_at,
            ReceiptEvent::ReceiptCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ReceiptOrder {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptOpened(e) => {
                self.id = e.receipt_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.code = e.code.clone();
                self.supplier_id = Some(e.supplier_id);
                self.created_by = Some(e.created_by);
                self.status = ReceiptStatus::Draft;
                self.lines.clear();
                self.damage_synthesized = false;
                self.created = true;
            }
            ReceiptEvent::ReceiptLineAdded(e) => {
                self.lines.push(ReceiptLine {
                    line_id: e.line_id,
                    product_id: e.product_id,
                    quantity_expected: e.quantity_expected,
                    line_cost: e.line_cost,
                    actual_good: 0,
                    actual_damaged: 0,
                    damage_reason: None,
                    touched: false,
                });
            }
            ReceiptEvent::LineActualsRecorded(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == e.line_id) {
                    line.actual_good += e.actual_good;
                    line.actual_damaged += e.actual_damaged;
                    if e.damage_reason.is_some() {
                        line.damage_reason = e.damage_reason.clone();
                    }
                    if let Some(cost) = e.cost_override {
                        line.line_cost = cost;
                    }
                    line.touched = true;
                }
                self.status = self.derive_status();
            }
            ReceiptEvent::DamageSynthesized(_) => {
                self.damage_synthesized = true;
            }
            ReceiptEvent::ReceiptCancelled(_) => {
                self.status = ReceiptStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::OpenReceipt(cmd) => self.handle_open(cmd),
            ReceiptCommand::AddReceiptLine(cmd) => self.handle_add_line(cmd),
            ReceiptCommand::RecordLineActuals(cmd) => self.handle_record_actuals(cmd),
            ReceiptCommand::MarkDamageSynthesized(cmd) => self.handle_mark_synthesized(cmd),
            ReceiptCommand::CancelReceipt(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl ReceiptOrder {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_receipt_id(&self, receipt_id: ReceiptOrderId) -> Result<(), DomainError> {
        if self.id != receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }
        Ok(())
    }

    fn ensure_opened(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::reference_not_found("receipt not found"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("receipt already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("receipt code cannot be empty"));
        }

        Ok(vec![ReceiptEvent::ReceiptOpened(ReceiptOpened {
            warehouse_id: cmd.warehouse_id,
            receipt_id: cmd.receipt_id,
            code: cmd.code.clone(),
            supplier_id: cmd.supplier_id,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddReceiptLine) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_receipt_id(cmd.receipt_id)?;

        if self.status != ReceiptStatus::Draft {
            return Err(DomainError::already_finalized(format!(
                "receipt {} is {:?}, lines can only be added in draft",
                self.code, self.status
            )));
        }
        if cmd.quantity_expected <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "expected quantity must be positive, got {}",
                cmd.quantity_expected
            )));
        }
        if cmd.line_cost < 0 {
            return Err(DomainError::validation("line cost cannot be negative"));
        }
        if self.lines.iter().any(|l| l.line_id == cmd.line_id) {
            return Err(DomainError::conflict(format!(
                "line {} already exists",
                cmd.line_id
            )));
        }

        Ok(vec![ReceiptEvent::ReceiptLineAdded(ReceiptLineAdded {
            warehouse_id: cmd.warehouse_id,
            receipt_id: cmd.receipt_id,
            line_id: cmd.line_id,
            product_id: cmd.product_id,
            quantity_expected: cmd.quantity_expected,
            line_cost: cmd.line_cost,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_actuals(
        &self,
        cmd: &RecordLineActuals,
    ) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_receipt_id(cmd.receipt_id)?;

        match self.status {
            ReceiptStatus::Draft | ReceiptStatus::Partial => {}
            status => {
                return Err(DomainError::already_finalized(format!(
                    "receipt {} is {status:?}",
                    self.code
                )));
            }
        }

        let line = self
            .line(cmd.line_id)
            .ok_or_else(|| DomainError::reference_not_found(format!("line {}", cmd.line_id)))?;

        if cmd.actual_good < 0 || cmd.actual_damaged < 0 {
            return Err(DomainError::invalid_quantity(
                "actual quantities cannot be negative",
            ));
        }
        if cmd.actual_good + cmd.actual_damaged == 0 {
            return Err(DomainError::invalid_quantity(
                "a delivery must account for at least one unit",
            ));
        }
        if cmd.actual_good + cmd.actual_damaged > line.outstanding() {
            return Err(DomainError::validation(format!(
                "delivery of {} units exceeds the {} still outstanding on line {}",
                cmd.actual_good + cmd.actual_damaged,
                line.outstanding(),
                cmd.line_id
            )));
        }
        if let Some(cost) = cmd.cost_override {
            if cost < 0 {
                return Err(DomainError::validation("cost override cannot be negative"));
            }
        }

        Ok(vec![ReceiptEvent::LineActualsRecorded(LineActualsRecorded {
            warehouse_id: cmd.warehouse_id,
            receipt_id: cmd.receipt_id,
            line_id: cmd.line_id,
            product_id: line.product_id,
            actual_good: cmd.actual_good,
            actual_damaged: cmd.actual_damaged,
            damage_reason: cmd.damage_reason.clone(),
            cost_override: cmd.cost_override,
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_synthesized(
        &self,
        cmd: &MarkDamageSynthesized,
    ) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_receipt_id(cmd.receipt_id)?;

        if self.damage_synthesized {
            return Err(DomainError::duplicate_reconciliation(format!(
                "return/replacement pair already created for receipt {}",
                self.code
            )));
        }

        Ok(vec![ReceiptEvent::DamageSynthesized(DamageSynthesized {
            warehouse_id: cmd.warehouse_id,
            receipt_id: cmd.receipt_id,
            return_order_id: cmd.return_order_id,
            replacement_receipt_id: cmd.replacement_receipt_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_receipt_id(cmd.receipt_id)?;

        match self.status {
            ReceiptStatus::Draft | ReceiptStatus::Partial => {}
            status => {
                return Err(DomainError::already_finalized(format!(
                    "receipt {} is {status:?}",
                    self.code
                )));
            }
        }

        Ok(vec![ReceiptEvent::ReceiptCancelled(ReceiptCancelled {
            warehouse_id: cmd.warehouse_id,
            receipt_id: cmd.receipt_id,
            actor_id: cmd.actor_id,
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

    fn test_receipt_id() -> ReceiptOrderId {
        ReceiptOrderId::new(AggregateId::new())
    }

    fn test_supplier_id() -> PartyId {
        PartyId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_actor_id() -> ActorId {
        ActorId::new()
    }

    fn drive(receipt: &mut ReceiptOrder, cmd: ReceiptCommand) -> Vec<ReceiptEvent> {
        let events = receipt.handle(&cmd).unwrap();
        for event in &events {
            receipt.apply(event);
        }
        events
    }

    fn opened_receipt() -> (ReceiptOrder, WarehouseId) {
        let warehouse_id = test_warehouse_id();
        let receipt_id = test_receipt_id();
        let mut receipt = ReceiptOrder::empty(receipt_id);
        drive(
            &mut receipt,
            ReceiptCommand::OpenReceipt(OpenReceipt {
                warehouse_id,
                receipt_id,
                code: "GRN-018F2A3B".to_string(),
                supplier_id: test_supplier_id(),
                created_by: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );
        (receipt, warehouse_id)
    }

    fn add_line(
        receipt: &mut ReceiptOrder,
        warehouse_id: WarehouseId,
        expected: i64,
        line_cost: i64,
    ) -> Uuid {
        let line_id = Uuid::now_v7();
        drive(
            receipt,
            ReceiptCommand::AddReceiptLine(AddReceiptLine {
                warehouse_id,
                receipt_id: receipt.id_typed(),
                line_id,
                product_id: test_product_id(),
                quantity_expected: expected,
                line_cost,
                occurred_at: Utc::now(),
            }),
        );
        line_id
    }

    fn record(
        receipt: &mut ReceiptOrder,
        warehouse_id: WarehouseId,
        line_id: Uuid,
        good: i64,
        damaged: i64,
    ) {
        drive(
            receipt,
            ReceiptCommand::RecordLineActuals(RecordLineActuals {
                warehouse_id,
                receipt_id: receipt.id_typed(),
                line_id,
                actual_good: good,
                actual_damaged: damaged,
                damage_reason: (damaged > 0).then(|| "crushed carton".to_string()),
                cost_override: None,
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );
    }

    #[test]
    fn fresh_receipt_is_draft() {
        let (receipt, _) = opened_receipt();
        assert_eq!(receipt.status(), ReceiptStatus::Draft);
        assert!(!receipt.damage_synthesized());
    }

    #[test]
    fn partial_delivery_moves_receipt_to_partial_and_keeps_line_open() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);
        add_line(&mut receipt, warehouse_id, 5, 500);

        record(&mut receipt, warehouse_id, line_id, 4, 0);

        assert_eq!(receipt.status(), ReceiptStatus::Partial);
        let line = receipt.line(line_id).unwrap();
        assert!(!line.is_complete());
        assert_eq!(line.outstanding(), 6);
    }

    #[test]
    fn receipt_completes_when_every_line_is_fully_accounted() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let first = add_line(&mut receipt, warehouse_id, 10, 1_000);
        let second = add_line(&mut receipt, warehouse_id, 5, 500);

        record(&mut receipt, warehouse_id, first, 10, 0);
        assert_eq!(receipt.status(), ReceiptStatus::Partial);

        record(&mut receipt, warehouse_id, second, 3, 2);
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
    }

    #[test]
    fn actuals_accumulate_across_deliveries() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);

        record(&mut receipt, warehouse_id, line_id, 4, 1);
        record(&mut receipt, warehouse_id, line_id, 5, 0);

        let line = receipt.line(line_id).unwrap();
        assert_eq!(line.actual_good, 9);
        assert_eq!(line.actual_damaged, 1);
        assert!(line.is_complete());
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
    }

    #[test]
    fn over_receipt_beyond_outstanding_is_rejected() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);
        record(&mut receipt, warehouse_id, line_id, 8, 0);

        let err = receipt
            .handle(&ReceiptCommand::RecordLineActuals(RecordLineActuals {
                warehouse_id,
                receipt_id: receipt.id_typed(),
                line_id,
                actual_good: 3,
                actual_damaged: 0,
                damage_reason: None,
                cost_override: None,
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn damaged_portion_cost_is_proportional_to_declared_line_value() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);
        record(&mut receipt, warehouse_id, line_id, 7, 3);

        let line = receipt.line(line_id).unwrap();
        assert_eq!(line.cost_share(line.actual_damaged), 300);
        assert_eq!(line.cost_share(line.actual_good), 700);
    }

    #[test]
    fn damage_synthesis_is_guarded_per_receipt() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);
        record(&mut receipt, warehouse_id, line_id, 7, 3);

        let receipt_id = receipt.id_typed();
        drive(
            &mut receipt,
            ReceiptCommand::MarkDamageSynthesized(MarkDamageSynthesized {
                warehouse_id,
                receipt_id,
                return_order_id: Uuid::now_v7(),
                replacement_receipt_id: Uuid::now_v7(),
                occurred_at: Utc::now(),
            }),
        );
        assert!(receipt.damage_synthesized());

        let err = receipt
            .handle(&ReceiptCommand::MarkDamageSynthesized(MarkDamageSynthesized {
                warehouse_id,
                receipt_id: receipt.id_typed(),
                return_order_id: Uuid::now_v7(),
                replacement_receipt_id: Uuid::now_v7(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateReconciliation(_)));
    }

    #[test]
    fn completed_receipt_cannot_be_cancelled() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 5, 500);
        record(&mut receipt, warehouse_id, line_id, 5, 0);
        assert_eq!(receipt.status(), ReceiptStatus::Completed);

        let err = receipt
            .handle(&ReceiptCommand::CancelReceipt(CancelReceipt {
                warehouse_id,
                receipt_id: receipt.id_typed(),
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));
    }

    #[test]
    fn partial_receipt_can_be_cancelled() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 5, 500);
        record(&mut receipt, warehouse_id, line_id, 2, 0);

        let receipt_id = receipt.id_typed();
        drive(
            &mut receipt,
            ReceiptCommand::CancelReceipt(CancelReceipt {
                warehouse_id,
                receipt_id,
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(receipt.status(), ReceiptStatus::Cancelled);
    }

    #[test]
    fn cost_override_replaces_declared_line_value() {
        let (mut receipt, warehouse_id) = opened_receipt();
        let line_id = add_line(&mut receipt, warehouse_id, 10, 1_000);

        let receipt_id = receipt.id_typed();
        drive(
            &mut receipt,
            ReceiptCommand::RecordLineActuals(RecordLineActuals {
                warehouse_id,
                receipt_id,
                line_id,
                actual_good: 5,
                actual_damaged: 0,
                damage_reason: None,
                cost_override: Some(2_000),
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );

        let line = receipt.line(line_id).unwrap();
        assert_eq!(line.line_cost, 2_000);
        assert_eq!(line.cost_share(5), 1_000);
    }
}
