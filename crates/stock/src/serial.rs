use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_core::{Entity, impl_uuid_newtype};

use crate::lot::LotId;

/// Serial unit identifier.
///
/// Ordered so it can serve as the deterministic tie-break between units
/// received in the same instant.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SerialId(Uuid);

impl_uuid_newtype!(SerialId, "SerialId");

/// Lifecycle of a serial unit. `InStock → Picked` happens exactly once,
/// atomically with the lot decrement that consumes the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialStatus {
    InStock,
    Picked,
}

/// Per-unit identity for serial-tracked products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialUnit {
    pub serial_id: SerialId,
    /// Lot the unit arrived in. Picking ignores lot membership; this is
    /// kept for traceability.
    pub lot_id: Option<LotId>,
    pub allocation_line_id: Option<Uuid>,
    pub serial_code: String,
    pub status: SerialStatus,
    pub received_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
}

impl Entity for SerialUnit {
    type Id = SerialId;

    fn id(&self) -> &Self::Id {
        &self.serial_id
    }
}

impl SerialUnit {
    pub fn is_in_stock(&self) -> bool {
        self.status == SerialStatus::InStock
    }
}

/// Mint a deterministic serial code for the `sequence`-th unit of a
/// receipt, sequence starting at 1.
pub fn mint_serial_code(product_code: &str, receipt_code: &str, sequence: u32) -> String {
    format!("{product_code}-{receipt_code}-{sequence:04}")
}
