use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_catalogue::ProductId;
use stocklot_core::{ActorId, ValueObject};

use crate::lot::LotId;

/// Kind of a quantity-changing ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Good stock accepted from a receipt.
    In,
    /// Stock consumed by an allocation.
    Out,
    /// Stock-count variance correction.
    Adjust,
    /// Damaged stock written off.
    Damage,
}

/// What a ledger entry (or damage record) points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Receipt,
    ReceiptLine,
    AllocationOrder,
    AllocationLine,
    StockCount,
}

/// Reference back to the business document that caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementRef {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl ValueObject for MovementRef {}

impl MovementRef {
    pub fn receipt(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::Receipt,
            id,
        }
    }

    pub fn receipt_line(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::ReceiptLine,
            id,
        }
    }

    pub fn allocation_order(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::AllocationOrder,
            id,
        }
    }

    pub fn allocation_line(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::AllocationLine,
            id,
        }
    }

    pub fn stock_count(id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::StockCount,
            id,
        }
    }
}

/// One quantity-changing event in a product's ledger.
///
/// Append-only. `balance_after` is the running sum of all prior deltas for
/// the product and must equal the sum of `quantity_remaining` across the
/// product's lots at the same instant. Entries order by
/// `(occurred_at, entry_seq)`; `entry_seq` is the per-product monotonic
/// tie-break for same-timestamp entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_seq: u64,
    pub product_id: ProductId,
    pub lot_id: Option<LotId>,
    pub occurred_at: DateTime<Utc>,
    pub kind: EntryKind,
    pub quantity_delta: i64,
    pub balance_after: i64,
    pub reference: MovementRef,
    pub actor_id: ActorId,
}
