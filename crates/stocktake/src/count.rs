use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocklot_catalogue::ProductId;
use stocklot_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use stocklot_events::Event;

/// Stock count identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockCountId(pub AggregateId);

impl StockCountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockCountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Two-phase lifecycle: a worker submits raw counts, then a privileged
/// actor approves, which is when system quantities and variances are
/// computed. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockCountStatus {
    Pending,
    Submitted,
    Completed,
}

/// A worker's raw count for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedLine {
    pub product_id: ProductId,
    pub actual_good: i64,
    pub actual_damaged: i64,
}

/// One product on a stock count. System quantity and variance stay empty
/// until approval computes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCountLine {
    pub product_id: ProductId,
    pub actual_good: i64,
    pub actual_damaged: i64,
    pub system_quantity: Option<i64>,
    pub variance: Option<i64>,
}

/// Approval-time computation for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineComputation {
    pub product_id: ProductId,
    /// Ledger-derived balance at approval time, net of the damage written
    /// off for this line.
    pub system_quantity: i64,
    /// `actual_good - system_quantity`.
    pub variance: i64,
}

/// Aggregate root: StockCount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCount {
    id: StockCountId,
    warehouse_id: Option<WarehouseId>,
    code: String,
    status: StockCountStatus,
    lines: Vec<StockCountLine>,
    created_by: Option<ActorId>,
    submitted_by: Option<ActorId>,
    approved_by: Option<ActorId>,
    version: u64,
    created: bool,
}

impl StockCount {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockCountId) -> Self {
        Self {
            id,
            warehouse_id: None,
            code: String::new(),
            status: StockCountStatus::Pending,
            lines: Vec::new(),
            created_by: None,
            submitted_by: None,
            approved_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockCountId {
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

    pub fn status(&self) -> StockCountStatus {
        self.status
    }

    pub fn lines(&self) -> &[StockCountLine] {
        &self.lines
    }
}

impl AggregateRoot for StockCount {
    type Id = StockCountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCount {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub code: String,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitCount.
///
/// Records the worker's raw counts. No system quantities are computed
/// here; that happens at approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCount {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub lines: Vec<CountedLine>,
    pub submitted_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveCount.
///
/// Carries the per-line computations made against the live ledger; the
/// approving service derives them inside the same unit of work that posts
/// the adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveCount {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub computed: Vec<LineComputation>,
    pub approved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCountCommand {
    OpenCount(OpenCount),
    SubmitCount(SubmitCount),
    ApproveCount(ApproveCount),
}

/// Event: CountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOpened {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub code: String,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSubmitted {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub lines: Vec<CountedLine>,
    pub submitted_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountApproved {
    pub warehouse_id: WarehouseId,
    pub count_id: StockCountId,
    pub computed: Vec<LineComputation>,
    pub approved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCountEvent {
    CountOpened(CountOpened),
    CountSubmitted(CountSubmitted),
    CountApproved(CountApproved),
}

impl Event for StockCountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockCountEvent::CountOpened(_) => "stocktake.count.opened",
            StockCountEvent::CountSubmitted(_) => "stocktake.count.submitted",
            StockCountEvent::CountApproved(_) => "stocktake.count.approved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockCountEvent::CountOpened(e) => e.occurred_at,
            StockCountEvent::CountSubmitted(e) => e.occurred_at,
            StockCountEvent::CountApproved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockCount {
    type Command = StockCountCommand;
    type Event = StockCountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockCountEvent::CountOpened(e) => {
                self.id = e.count_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.code = e.code.clone();
                self.created_by = Some(e.created_by);
                self.status = StockCountStatus::Pending;
                self.lines.clear();
                self.created = true;
            }
            StockCountEvent::CountSubmitted(e) => {
                self.lines = e
                    .lines
                    .iter()
                    .map(|l| StockCountLine {
                        product_id: l.product_id,
                        actual_good: l.actual_good,
                        actual_damaged: l.actual_damaged,
                        system_quantity: None,
                        variance: None,
                    })
                    .collect();
                self.submitted_by = Some(e.submitted_by);
                self.status = StockCountStatus::Submitted;
            }
            StockCountEvent::CountApproved(e) => {
                for computation in &e.computed {
                    if let Some(line) = self
                        .lines
                        .iter_mut()
                        .find(|l| l.product_id == computation.product_id)
                    {
                        line.system_quantity = Some(computation.system_quantity);
                        line.variance = Some(computation.variance);
                    }
                }
                self.approved_by = Some(e.approved_by);
                self.status = StockCountStatus::Completed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCountCommand::OpenCount(cmd) => self.handle_open(cmd),
            StockCountCommand::SubmitCount(cmd) => self.handle_submit(cmd),
            StockCountCommand::ApproveCount(cmd) => self.handle_approve(cmd),
        }
    }
}

impl StockCount {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn ensure_count_id(&self, count_id: StockCountId) -> Result<(), DomainError> {
        if self.id != count_id {
            return Err(DomainError::invariant("count_id mismatch"));
        }
        Ok(())
    }

    fn ensure_opened(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::reference_not_found("stock count not found"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCount) -> Result<Vec<StockCountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock count already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("count code cannot be empty"));
        }

        Ok(vec![StockCountEvent::CountOpened(CountOpened {
            warehouse_id: cmd.warehouse_id,
            count_id: cmd.count_id,
            code: cmd.code.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitCount) -> Result<Vec<StockCountEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_count_id(cmd.count_id)?;

        match self.status {
            StockCountStatus::Pending => {}
            StockCountStatus::Submitted => {
                return Err(DomainError::conflict("stock count already submitted"));
            }
            StockCountStatus::Completed => {
                return Err(DomainError::already_finalized(format!(
                    "stock count {} is completed",
                    self.code
                )));
            }
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "a stock count must cover at least one product",
            ));
        }
        for line in &cmd.lines {
            if line.actual_good < 0 || line.actual_damaged < 0 {
                return Err(DomainError::invalid_quantity(
                    "counted quantities cannot be negative",
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for line in &cmd.lines {
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} counted twice",
                    line.product_id
                )));
            }
        }

        Ok(vec![StockCountEvent::CountSubmitted(CountSubmitted {
            warehouse_id: cmd.warehouse_id,
            count_id: cmd.count_id,
            lines: cmd.lines.clone(),
            submitted_by: cmd.submitted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveCount) -> Result<Vec<StockCountEvent>, DomainError> {
        self.ensure_opened()?;
        self.ensure_warehouse(cmd.warehouse_id)?;
        self.ensure_count_id(cmd.count_id)?;

        match self.status {
            StockCountStatus::Submitted => {}
            StockCountStatus::Pending => {
                return Err(DomainError::validation(
                    "stock count must be submitted before approval",
                ));
            }
            StockCountStatus::Completed => {
                return Err(DomainError::already_finalized(format!(
                    "stock count {} is completed",
                    self.code
                )));
            }
        }

        // Every submitted line must be computed exactly once.
        if cmd.computed.len() != self.lines.len() {
            return Err(DomainError::validation(format!(
                "expected {} line computations, got {}",
                self.lines.len(),
                cmd.computed.len()
            )));
        }
        for line in &self.lines {
            let computation = cmd
                .computed
                .iter()
                .find(|c| c.product_id == line.product_id)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "missing computation for product {}",
                        line.product_id
                    ))
                })?;
            if computation.variance != line.actual_good - computation.system_quantity {
                return Err(DomainError::invariant(format!(
                    "variance for product {} does not match actual - system",
                    line.product_id
                )));
            }
        }

        Ok(vec![StockCountEvent::CountApproved(CountApproved {
            warehouse_id: cmd.warehouse_id,
            count_id: cmd.count_id,
            computed: cmd.computed.clone(),
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
