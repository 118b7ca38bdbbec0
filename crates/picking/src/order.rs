use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use stocklot_events::Event;
use stocklot_partners::PartyId;
use stocklot_stock::SerialId;

/// Allocation (picking) order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationOrderId(pub AggregateId);

impl AllocationOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AllocationOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of an allocation order. `Pending` is the only mutable state;
/// `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationOrderStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Why the stock is leaving: regular outbound dispatch, or damaged goods
/// going back to the supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Dispatch,
    SupplierReturn,
}

/// One requested product on an allocation order.
///
/// `unit_price` and `serials` stay empty until completion fills them from
/// the FIFO engine's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Option<i64>,
    pub serials: Vec<SerialId>,
}

/// Completion result for one line: the average unit price computed by the
/// allocation engine and the serial units that left with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFill {
    pub line_id: Uuid,
    pub unit_price: i64,
    pub serials: Vec<SerialId>,
}

/// Aggregate root: AllocationOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOrder {
    id: AllocationOrderId,
    warehouse_id: Option<WarehouseId>,
    code: String,
    party_id: Option<PartyId>,
    purpose: OrderPurpose,
    created_by: Option<ActorId>,
    status: AllocationOrderStatus,
    lines: Vec<AllocationLine>,
    version: u64,
    created: bool,
}

impl AllocationOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AllocationOrderId) -> Self {
        Self {
            id,
            warehouse_id: None,
            code: String::new(),
            party_id: None,
            purpose: OrderPurpose::Dispatch,
            created_by: None,
            status: AllocationOrderStatus::Pending,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AllocationOrderId {
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

    pub fn party_id(&self) -> Option<PartyId> {
        self.party_id
    }

    pub fn purpose(&self) -> OrderPurpose {
        self.purpose
    }

    pub fn status(&self) -> AllocationOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[AllocationLine] {
        &self.lines
    }
}

impl AggregateRoot for AllocationOrder {
    type Id = AllocationOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub code: String,
    pub party_id: PartyId,
    pub purpose: OrderPurpose,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddOrderLine (only allowed while Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOrderLine {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
///
/// Carries one fill per line, produced by the allocation engine. The
/// caller must have evaluated every line before issuing this command;
/// completion is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub fills: Vec<LineFill>,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (only allowed while Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationOrderCommand {
    OpenOrder(OpenOrder),
    AddOrderLine(AddOrderLine),
    CompleteOrder(CompleteOrder),
    CancelOrder(CancelOrder),
}

/// Event: OrderOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub code: String,
    pub party_id: PartyId,
    pub purpose: OrderPurpose,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineAdded {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub line_id: Uuid,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub fills: Vec<LineFill>,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
///
/// A pure status transition: no lots were touched while Pending, so there
/// is no ledger effect to reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub warehouse_id: WarehouseId,
    pub order_id: AllocationOrderId,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationOrderEvent {
    OrderOpened(OrderOpened),
    OrderLineAdded(OrderLineAdded),
    OrderCompleted(OrderCompleted),
    OrderCancelled(OrderCancelled),
}

impl Event for AllocationOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationOrderEvent::OrderOpened(_) => "picking.order.opened",
            AllocationOrderEvent::OrderLineAdded(_) => "picking.order.line_added",
            AllocationOrderEvent::OrderCompleted(_) => "picking.order.completed",
            AllocationOrderEvent::OrderCancelled(_) => "picking.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationOrderEvent::OrderOpened(e) => e.occurred_at,
            AllocationOrderEvent::OrderLineAdded(e) => e.occurred_at,
            AllocationOrderEvent::OrderCompleted(e) => e.occurred_at,
            AllocationOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for AllocationOrder {
    type Command = AllocationOrderCommand;
    type Event = AllocationOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AllocationOrderEvent::OrderOpened(e) => {
                self.id = e.order_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.code = e.code.clone();
                self.party_id = Some(e.party_id);
                self.purpose = e.purpose;
                self.created_by = Some(e.created_by);
                self.status = AllocationOrderStatus::Pending;
                self.lines.clear();
                self.created = true;
            }
            AllocationOrderEvent::OrderLineAdded(e) => {
                self.lines.push(AllocationLine {
                    line_id: e.line_id,
                    product_id: e.product_id,
                    quantity: e.quantity,
                    unit_price: None,
                    serials: Vec::new(),
                });
            }
            AllocationOrderEvent::OrderCompleted(e) => {
                for fill in &e.fills {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_id == fill.line_id) {
                        line.unit_price = Some(fill.unit_price);
                        line.serials = fill.serials.clone();
                    }
                }
                self.status = AllocationOrderStatus::Completed;
            }
            AllocationOrderEvent::OrderCancelled(_) => {
                self.status = AllocationOrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AllocationOrderCommand::OpenOrder(cmd) => self.handle_open(cmd),
            AllocationOrderCommand::AddOrderLine(cmd) => self.handle_add_line(cmd),
            AllocationOrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            AllocationOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl AllocationOrder {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: AllocationOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_opened(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::reference_not_found("allocation order not found"));
        }
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.status != AllocationOrderStatus::Pending {
            return Err(DomainError::already_finalized(format!(
                "allocation order {} is {:?}",
                self.code, self.status
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenOrder) -> Result<Vec<AllocationOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("allocation order already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("order code cannot be empty"));
        }

        Ok(vec![AllocationOrderEvent::OrderOpened(OrderOpened {
            warehouse_id: cmd.warehouse_id,
            order_id: cmd.order_id,
            code: cmd.code.clone(),
            party_id: cmd.party_id,
            purpose: cmd.purpose,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddOrderLine) -> Result<Vec<AllocationOrderEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_pending()?;

        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "line quantity must be positive, got {}",
                cmd.quantity
            )));
        }
        if self.lines.iter().any(|l| l.line_id == cmd.line_id) {
            return Err(DomainError::conflict(format!(
                "line {} already exists",
                cmd.line_id
            )));
        }

        Ok(vec![AllocationOrderEvent::OrderLineAdded(OrderLineAdded {
            warehouse_id: cmd.warehouse_id,
            order_id: cmd.order_id,
            line_id: cmd.line_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<AllocationOrderEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_pending()?;

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot complete allocation order without lines",
            ));
        }

        // Every line must be filled exactly once; a completion that covers
        // only part of the order is not a valid state.
        if cmd.fills.len() != self.lines.len() {
            return Err(DomainError::validation(format!(
                "expected {} fills, got {}",
                self.lines.len(),
                cmd.fills.len()
            )));
        }
        for line in &self.lines {
            if !cmd.fills.iter().any(|f| f.line_id == line.line_id) {
                return Err(DomainError::validation(format!(
                    "missing fill for line {}",
                    line.line_id
                )));
            }
        }
        for fill in &cmd.fills {
            if fill.unit_price < 0 {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
        }

        Ok(vec![AllocationOrderEvent::OrderCompleted(OrderCompleted {
            warehouse_id: cmd.warehouse_id,
            order_id: cmd.order_id,
            fills: cmd.fills.clone(),
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<AllocationOrderEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_pending()?;

        Ok(vec![AllocationOrderEvent::OrderCancelled(OrderCancelled {
            warehouse_id: cmd.warehouse_id,
            order_id: cmd.order_id,
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

    fn test_order_id() -> AllocationOrderId {
        AllocationOrderId::new(AggregateId::new())
    }

    fn test_party_id() -> PartyId {
        PartyId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_actor_id() -> ActorId {
        ActorId::new()
    }

    fn drive(order: &mut AllocationOrder, cmd: AllocationOrderCommand) -> Vec<AllocationOrderEvent> {
        let events = order.handle(&cmd).unwrap();
        for event in &events {
            order.apply(event);
        }
        events
    }

    fn opened_order() -> (AllocationOrder, WarehouseId) {
        let warehouse_id = test_warehouse_id();
        let order_id = test_order_id();
        let mut order = AllocationOrder::empty(order_id);
        drive(
            &mut order,
            AllocationOrderCommand::OpenOrder(OpenOrder {
                warehouse_id,
                order_id,
                code: "PCK-018F2A3B".to_string(),
                party_id: test_party_id(),
                purpose: OrderPurpose::Dispatch,
                created_by: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );
        (order, warehouse_id)
    }

    fn add_line(order: &mut AllocationOrder, warehouse_id: WarehouseId, quantity: i64) -> Uuid {
        let line_id = Uuid::now_v7();
        drive(
            order,
            AllocationOrderCommand::AddOrderLine(AddOrderLine {
                warehouse_id,
                order_id: order.id_typed(),
                line_id,
                product_id: test_product_id(),
                quantity,
                occurred_at: Utc::now(),
            }),
        );
        line_id
    }

    #[test]
    fn open_order_starts_pending_with_no_lines() {
        let (order, _) = opened_order();
        assert_eq!(order.status(), AllocationOrderStatus::Pending);
        assert!(order.lines().is_empty());
        assert_eq!(order.code(), "PCK-018F2A3B");
    }

    #[test]
    fn completion_fills_every_line() {
        let (mut order, warehouse_id) = opened_order();
        let first = add_line(&mut order, warehouse_id, 10);
        let second = add_line(&mut order, warehouse_id, 5);

        let order_id = order.id_typed();
        drive(
            &mut order,
            AllocationOrderCommand::CompleteOrder(CompleteOrder {
                warehouse_id,
                order_id,
                fills: vec![
                    LineFill {
                        line_id: first,
                        unit_price: 120,
                        serials: vec![],
                    },
                    LineFill {
                        line_id: second,
                        unit_price: 80,
                        serials: vec![],
                    },
                ],
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(order.status(), AllocationOrderStatus::Completed);
        assert_eq!(order.lines()[0].unit_price, Some(120));
        assert_eq!(order.lines()[1].unit_price, Some(80));
    }

    #[test]
    fn completion_with_missing_fill_is_rejected() {
        let (mut order, warehouse_id) = opened_order();
        add_line(&mut order, warehouse_id, 10);
        add_line(&mut order, warehouse_id, 5);

        let err = order
            .handle(&AllocationOrderCommand::CompleteOrder(CompleteOrder {
                warehouse_id,
                order_id: order.id_typed(),
                fills: vec![LineFill {
                    line_id: order.lines()[0].line_id,
                    unit_price: 120,
                    serials: vec![],
                }],
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(order.status(), AllocationOrderStatus::Pending);
    }

    #[test]
    fn completed_order_rejects_further_mutation() {
        let (mut order, warehouse_id) = opened_order();
        let line = add_line(&mut order, warehouse_id, 10);
        let order_id = order.id_typed();
        drive(
            &mut order,
            AllocationOrderCommand::CompleteOrder(CompleteOrder {
                warehouse_id,
                order_id,
                fills: vec![LineFill {
                    line_id: line,
                    unit_price: 100,
                    serials: vec![],
                }],
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );

        let err = order
            .handle(&AllocationOrderCommand::CancelOrder(CancelOrder {
                warehouse_id,
                order_id: order.id_typed(),
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));

        let err = order
            .handle(&AllocationOrderCommand::AddOrderLine(AddOrderLine {
                warehouse_id,
                order_id: order.id_typed(),
                line_id: Uuid::now_v7(),
                product_id: test_product_id(),
                quantity: 1,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));
    }

    #[test]
    fn cancel_while_pending_is_a_pure_status_transition() {
        let (mut order, warehouse_id) = opened_order();
        add_line(&mut order, warehouse_id, 10);

        let order_id = order.id_typed();
        let events = drive(
            &mut order,
            AllocationOrderCommand::CancelOrder(CancelOrder {
                warehouse_id,
                order_id,
                actor_id: test_actor_id(),
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(order.status(), AllocationOrderStatus::Cancelled);
        // Lines keep their requested quantities; nothing was allocated.
        assert_eq!(order.lines()[0].unit_price, None);
    }

    #[test]
    fn non_positive_line_quantity_is_rejected() {
        let (order, warehouse_id) = opened_order();
        let err = order
            .handle(&AllocationOrderCommand::AddOrderLine(AddOrderLine {
                warehouse_id,
                order_id: order.id_typed(),
                line_id: Uuid::now_v7(),
                product_id: test_product_id(),
                quantity: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }
}
