use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use stocklot_events::Event;

use crate::fifo::{self, LotDraw};
use crate::ledger::{EntryKind, LedgerEntry, MovementRef};
use crate::lot::{Lot, LotId};
use crate::serial::{SerialId, SerialStatus, SerialUnit, mint_serial_code};

/// Product stock identifier. By convention this is the product's own uuid,
/// so callers can address a product's stream without a lookup table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductStockId(pub AggregateId);

impl ProductStockId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_product(product_id: ProductId) -> Self {
        Self(product_id.0)
    }
}

impl core::fmt::Display for ProductStockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: ProductStock.
///
/// One stream per (warehouse, product). Owns the product's lots, serial
/// units, running balance, and ledger entry sequence. Different products
/// are independent streams and proceed fully in parallel; concurrent
/// writers against the same product serialize through the stream's
/// optimistic version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    id: ProductStockId,
    warehouse_id: Option<WarehouseId>,
    product_id: Option<ProductId>,
    product_code: String,
    serial_tracked: bool,
    lots: Vec<Lot>,
    serials: Vec<SerialUnit>,
    balance: i64,
    entry_seq: u64,
    version: u64,
    created: bool,
}

impl ProductStock {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: ProductStockId) -> Self {
        Self {
            id,
            warehouse_id: None,
            product_id: None,
            product_code: String::new(),
            serial_tracked: false,
            lots: Vec::new(),
            serials: Vec::new(),
            balance: 0,
            entry_seq: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductStockId {
        self.id
    }

    pub fn is_opened(&self) -> bool {
        self.created
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn serial_tracked(&self) -> bool {
        self.serial_tracked
    }

    /// Current balance; always equals the sum of `quantity_remaining`
    /// across lots and the `balance_after` of the latest ledger entry.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn serials(&self) -> &[SerialUnit] {
        &self.serials
    }

    pub fn in_stock_serial_count(&self) -> i64 {
        self.serials.iter().filter(|s| s.is_in_stock()).count() as i64
    }

    pub fn last_entry_seq(&self) -> u64 {
        self.entry_seq
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductStockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenProductStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenProductStock {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub product_id: ProductId,
    pub product_code: String,
    pub serial_tracked: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveLot.
///
/// `serial_ids` must carry exactly one id per unit for serial-tracked
/// products (ids are generated by the caller so decision logic stays
/// deterministic) and must be empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLot {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub lot_id: LotId,
    pub source_line_id: Option<Uuid>,
    pub quantity: i64,
    pub cost_total: i64,
    pub receipt_code: String,
    pub serial_ids: Vec<SerialId>,
    pub reference: MovementRef,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateStock (one allocation order line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateStock {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub allocation_line_id: Uuid,
    pub quantity: i64,
    pub reference: MovementRef,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeductDamaged (stock-count damage write-off).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductDamaged {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub quantity: i64,
    pub reference: MovementRef,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustVariance (stock-count correction).
///
/// `fallback_lot_id` is only used when a positive variance finds no lot
/// with remaining stock to absorb it and a fresh zero-cost lot must be
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustVariance {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub delta: i64,
    pub fallback_lot_id: LotId,
    pub reference: MovementRef,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStockCommand {
    OpenProductStock(OpenProductStock),
    ReceiveLot(ReceiveLot),
    AllocateStock(AllocateStock),
    DeductDamaged(DeductDamaged),
    AdjustVariance(AdjustVariance),
}

/// Event: ProductStockOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStockOpened {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub product_id: ProductId,
    pub product_code: String,
    pub serial_tracked: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LotReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotReceived {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub lot: Lot,
    pub serials: Vec<SerialUnit>,
    pub entry: LedgerEntry,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAllocated.
///
/// Carries one `Out` ledger entry per lot drawn, each with the running
/// balance after that specific deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocated {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub allocation_line_id: Uuid,
    pub quantity: i64,
    pub draws: Vec<LotDraw>,
    pub total_cost: i64,
    pub unit_price: i64,
    pub serial_ids: Vec<SerialId>,
    pub entries: Vec<LedgerEntry>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DamageWrittenOff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageWrittenOff {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub quantity: i64,
    pub draws: Vec<LotDraw>,
    pub entry: LedgerEntry,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BalanceAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjusted {
    pub warehouse_id: WarehouseId,
    pub stock_id: ProductStockId,
    pub delta: i64,
    /// FIFO draws, non-empty when `delta < 0`.
    pub draws: Vec<LotDraw>,
    /// Existing lot the positive variance was absorbed into.
    pub absorbed_into: Option<LotId>,
    /// Fresh zero-cost lot, when no open lot could absorb the increase.
    pub new_lot: Option<Lot>,
    pub entry: LedgerEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStockEvent {
    ProductStockOpened(ProductStockOpened),
    LotReceived(LotReceived),
    StockAllocated(StockAllocated),
    DamageWrittenOff(DamageWrittenOff),
    BalanceAdjusted(BalanceAdjusted),
}

impl Event for ProductStockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductStockEvent::ProductStockOpened(_) => "stock.product.opened",
            ProductStockEvent::LotReceived(_) => "stock.product.lot_received",
            ProductStockEvent::StockAllocated(_) => "stock.product.allocated",
            ProductStockEvent::DamageWrittenOff(_) => "stock.product.damage_written_off",
            ProductStockEvent::BalanceAdjusted(_) => "stock.product.balance_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductStockEvent::ProductStockOpened(e) => e.occurred_at,
            ProductStockEvent::LotReceived(e) => e.occurred_at,
            ProductStockEvent::StockAllocated(e) => e.occurred_at,
            ProductStockEvent::DamageWrittenOff(e) => e.occurred_at,
            ProductStockEvent::BalanceAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = ProductStockCommand;
    type Event = ProductStockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductStockEvent::ProductStockOpened(e) => {
                self.id = e.stock_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.product_id = Some(e.product_id);
                self.product_code = e.product_code.clone();
                self.serial_tracked = e.serial_tracked;
                self.created = true;
            }
            ProductStockEvent::LotReceived(e) => {
                self.lots.push(e.lot.clone());
                self.serials.extend(e.serials.iter().cloned());
                self.balance += e.lot.quantity_received;
                self.entry_seq = e.entry.entry_seq;
            }
            ProductStockEvent::StockAllocated(e) => {
                self.consume_draws(&e.draws);
                for serial_id in &e.serial_ids {
                    if let Some(unit) = self
                        .serials
                        .iter_mut()
                        .find(|s| s.serial_id == *serial_id)
                    {
                        unit.status = SerialStatus::Picked;
                        unit.allocation_line_id = Some(e.allocation_line_id);
                        unit.picked_at = Some(e.occurred_at);
                    }
                }
                self.balance -= e.quantity;
                if let Some(last) = e.entries.last() {
                    self.entry_seq = last.entry_seq;
                }
            }
            ProductStockEvent::DamageWrittenOff(e) => {
                self.consume_draws(&e.draws);
                self.balance -= e.quantity;
                self.entry_seq = e.entry.entry_seq;
            }
            ProductStockEvent::BalanceAdjusted(e) => {
                if e.delta < 0 {
                    self.consume_draws(&e.draws);
                } else if let Some(lot_id) = e.absorbed_into {
                    if let Some(lot) = self.lots.iter_mut().find(|l| l.lot_id == lot_id) {
                        lot.quantity_received += e.delta;
                        lot.quantity_remaining += e.delta;
                    }
                } else if let Some(new_lot) = &e.new_lot {
                    self.lots.push(new_lot.clone());
                }
                self.balance += e.delta;
                self.entry_seq = e.entry.entry_seq;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductStockCommand::OpenProductStock(cmd) => self.handle_open(cmd),
            ProductStockCommand::ReceiveLot(cmd) => self.handle_receive(cmd),
            ProductStockCommand::AllocateStock(cmd) => self.handle_allocate(cmd),
            ProductStockCommand::DeductDamaged(cmd) => self.handle_deduct_damaged(cmd),
            ProductStockCommand::AdjustVariance(cmd) => self.handle_adjust_variance(cmd),
        }
    }
}

impl ProductStock {
    fn consume_draws(&mut self, draws: &[LotDraw]) {
        for draw in draws {
            if let Some(lot) = self.lots.iter_mut().find(|l| l.lot_id == draw.lot_id) {
                lot.quantity_remaining -= draw.quantity;
            }
        }
    }

    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_stock_id(&self, stock_id: ProductStockId) -> Result<(), DomainError> {
        if self.id != stock_id {
            return Err(DomainError::invariant("stock_id mismatch"));
        }
        Ok(())
    }

    fn ensure_opened(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::reference_not_found(
                "product stock has not been opened",
            ));
        }
        Ok(())
    }

    fn product_id_checked(&self) -> Result<ProductId, DomainError> {
        self.product_id
            .ok_or_else(|| DomainError::invariant("product_id must be set"))
    }

    fn handle_open(&self, cmd: &OpenProductStock) -> Result<Vec<ProductStockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product stock already opened"));
        }
        if cmd.product_code.trim().is_empty() {
            return Err(DomainError::validation("product code cannot be empty"));
        }

        Ok(vec![ProductStockEvent::ProductStockOpened(
            ProductStockOpened {
                warehouse_id: cmd.warehouse_id,
                stock_id: cmd.stock_id,
                product_id: cmd.product_id,
                product_code: cmd.product_code.clone(),
                serial_tracked: cmd.serial_tracked,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receive(&self, cmd: &ReceiveLot) -> Result<Vec<ProductStockEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_stock_id(cmd.stock_id)?;

        if self.lots.iter().any(|l| l.lot_id == cmd.lot_id) {
            return Err(DomainError::conflict(format!(
                "lot {} already exists",
                cmd.lot_id
            )));
        }

        let lot = Lot::new(
            cmd.lot_id,
            cmd.source_line_id,
            cmd.quantity,
            cmd.cost_total,
            cmd.occurred_at,
        )?;

        let serials = if self.serial_tracked {
            if cmd.serial_ids.len() as i64 != cmd.quantity {
                return Err(DomainError::validation(format!(
                    "serial-tracked receipt needs {} serial ids, got {}",
                    cmd.quantity,
                    cmd.serial_ids.len()
                )));
            }
            self.mint_serials(cmd)?
        } else {
            if !cmd.serial_ids.is_empty() {
                return Err(DomainError::validation(
                    "product is not serial-tracked but serial ids were supplied",
                ));
            }
            Vec::new()
        };

        let entry = LedgerEntry {
            entry_seq: self.entry_seq + 1,
            product_id: self.product_id_checked()?,
            lot_id: Some(cmd.lot_id),
            occurred_at: cmd.occurred_at,
            kind: EntryKind::In,
            quantity_delta: cmd.quantity,
            balance_after: self.balance + cmd.quantity,
            reference: cmd.reference,
            actor_id: cmd.actor_id,
        };

        Ok(vec![ProductStockEvent::LotReceived(LotReceived {
            warehouse_id: cmd.warehouse_id,
            stock_id: cmd.stock_id,
            lot,
            serials,
            entry,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn mint_serials(&self, cmd: &ReceiveLot) -> Result<Vec<SerialUnit>, DomainError> {
        if cmd.receipt_code.trim().is_empty() {
            return Err(DomainError::validation("receipt code cannot be empty"));
        }

        // Sequence continues across multiple deliveries against the same
        // receipt, starting at 1.
        let prefix = format!("{}-{}-", self.product_code, cmd.receipt_code);
        let already_minted = self
            .serials
            .iter()
            .filter(|s| s.serial_code.starts_with(&prefix))
            .count() as u32;

        let mut units = Vec::with_capacity(cmd.serial_ids.len());
        for (i, serial_id) in cmd.serial_ids.iter().enumerate() {
            if self.serials.iter().any(|s| s.serial_id == *serial_id) {
                return Err(DomainError::conflict(format!(
                    "serial unit {serial_id} already exists"
                )));
            }
            units.push(SerialUnit {
                serial_id: *serial_id,
                lot_id: Some(cmd.lot_id),
                allocation_line_id: None,
                serial_code: mint_serial_code(
                    &self.product_code,
                    &cmd.receipt_code,
                    already_minted + i as u32 + 1,
                ),
                status: SerialStatus::InStock,
                received_at: cmd.occurred_at,
                picked_at: None,
            });
        }
        Ok(units)
    }

    fn handle_allocate(&self, cmd: &AllocateStock) -> Result<Vec<ProductStockEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_stock_id(cmd.stock_id)?;

        // Quantity check first; the serial check only runs once the lots
        // can cover the request, so the two failure modes stay distinct.
        let draws = fifo::plan_draws(&self.lots, cmd.quantity)?;

        let serial_ids = if self.serial_tracked {
            fifo::pick_serials(&self.serials, cmd.quantity)?
        } else {
            Vec::new()
        };

        let total_cost: i64 = draws.iter().map(|d| d.cost).sum();
        let unit_price = total_cost / cmd.quantity;

        let product_id = self.product_id_checked()?;
        let mut entries = Vec::with_capacity(draws.len());
        let mut running = self.balance;
        for (i, draw) in draws.iter().enumerate() {
            running -= draw.quantity;
            entries.push(LedgerEntry {
                entry_seq: self.entry_seq + i as u64 + 1,
                product_id,
                lot_id: Some(draw.lot_id),
                occurred_at: cmd.occurred_at,
                kind: EntryKind::Out,
                quantity_delta: -draw.quantity,
                balance_after: running,
                reference: cmd.reference,
                actor_id: cmd.actor_id,
            });
        }

        Ok(vec![ProductStockEvent::StockAllocated(StockAllocated {
            warehouse_id: cmd.warehouse_id,
            stock_id: cmd.stock_id,
            allocation_line_id: cmd.allocation_line_id,
            quantity: cmd.quantity,
            draws,
            total_cost,
            unit_price,
            serial_ids,
            entries,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deduct_damaged(
        &self,
        cmd: &DeductDamaged,
    ) -> Result<Vec<ProductStockEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_stock_id(cmd.stock_id)?;

        let draws = fifo::plan_draws(&self.lots, cmd.quantity)?;

        let entry = LedgerEntry {
            entry_seq: self.entry_seq + 1,
            product_id: self.product_id_checked()?,
            lot_id: None,
            occurred_at: cmd.occurred_at,
            kind: EntryKind::Damage,
            quantity_delta: -cmd.quantity,
            balance_after: self.balance - cmd.quantity,
            reference: cmd.reference,
            actor_id: cmd.actor_id,
        };

        Ok(vec![ProductStockEvent::DamageWrittenOff(DamageWrittenOff {
            warehouse_id: cmd.warehouse_id,
            stock_id: cmd.stock_id,
            quantity: cmd.quantity,
            draws,
            entry,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_variance(
        &self,
        cmd: &AdjustVariance,
    ) -> Result<Vec<ProductStockEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_stock_id(cmd.stock_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::invalid_quantity(
                "variance delta must be non-zero",
            ));
        }

        let mut draws = Vec::new();
        let mut absorbed_into = None;
        let mut new_lot = None;

        if cmd.delta < 0 {
            draws = fifo::plan_draws(&self.lots, -cmd.delta)?;
        } else {
            // Absorb into the most-recently-received lot with remaining
            // stock; both received and remaining grow so the
            // `remaining <= received` invariant survives.
            absorbed_into = self
                .lots
                .iter()
                .filter(|l| l.quantity_remaining > 0)
                .max_by_key(|l| (l.received_at, l.lot_id))
                .map(|l| l.lot_id);

            if absorbed_into.is_none() {
                new_lot = Some(Lot::new(
                    cmd.fallback_lot_id,
                    None,
                    cmd.delta,
                    0,
                    cmd.occurred_at,
                )?);
            }
        }

        let entry = LedgerEntry {
            entry_seq: self.entry_seq + 1,
            product_id: self.product_id_checked()?,
            lot_id: absorbed_into.or(new_lot.as_ref().map(|l| l.lot_id)),
            occurred_at: cmd.occurred_at,
            kind: EntryKind::Adjust,
            quantity_delta: cmd.delta,
            balance_after: self.balance + cmd.delta,
            reference: cmd.reference,
            actor_id: cmd.actor_id,
        };

        Ok(vec![ProductStockEvent::BalanceAdjusted(BalanceAdjusted {
            warehouse_id: cmd.warehouse_id,
            stock_id: cmd.stock_id,
            delta: cmd.delta,
            draws,
            absorbed_into,
            new_lot,
            entry,
            occurred_at: cmd.occurred_at,
        })])
    }
}
