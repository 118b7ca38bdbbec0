use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_core::{DomainError, DomainResult, Entity, impl_uuid_newtype};

/// Lot identifier.
///
/// Ordered so it can serve as the deterministic tie-break between lots
/// received in the same instant (UUIDv7 ids are time-ordered).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LotId(Uuid);

impl_uuid_newtype!(LotId, "LotId");

/// One accepted receipt of good stock.
///
/// Lots are never deleted: a depleted lot (`quantity_remaining == 0`)
/// remains for audit history. The only mutations are allocation decrements
/// and variance increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: LotId,
    /// Receipt line this lot was accepted from; `None` for lots created by
    /// a positive stock-count variance.
    pub source_line_id: Option<Uuid>,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    /// Whole-lot value at receipt, in minor currency units. The cost basis
    /// is fixed here; later partial consumption never re-prices it.
    pub cost_total: i64,
    pub received_at: DateTime<Utc>,
}

impl Entity for Lot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.lot_id
    }
}

impl Lot {
    pub fn new(
        lot_id: LotId,
        source_line_id: Option<Uuid>,
        quantity: i64,
        cost_total: i64,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "lot quantity must be positive, got {quantity}"
            )));
        }
        if cost_total < 0 {
            return Err(DomainError::validation(format!(
                "lot cost cannot be negative, got {cost_total}"
            )));
        }
        Ok(Self {
            lot_id,
            source_line_id,
            quantity_received: quantity,
            quantity_remaining: quantity,
            cost_total,
            received_at,
        })
    }

    pub fn is_depleted(&self) -> bool {
        self.quantity_remaining == 0
    }

    /// Proportional share of the lot's receipt value for `quantity` units.
    ///
    /// Divides by `quantity_received`, not `quantity_remaining`: the cost
    /// basis is what was paid per received unit, regardless of how much has
    /// been consumed since.
    pub fn cost_of(&self, quantity: i64) -> i64 {
        debug_assert!(quantity >= 0 && quantity <= self.quantity_received);
        let share = (self.cost_total as i128 * quantity as i128) / self.quantity_received as i128;
        share as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lot(quantity: i64, cost_total: i64) -> Lot {
        Lot::new(LotId::new(), None, quantity, cost_total, Utc::now()).unwrap()
    }

    #[test]
    fn cost_share_is_proportional_to_received_quantity() {
        let lot = test_lot(100, 2_000_000);
        assert_eq!(lot.cost_of(50), 1_000_000);
        assert_eq!(lot.cost_of(100), 2_000_000);
        assert_eq!(lot.cost_of(0), 0);
    }

    #[test]
    fn cost_share_ignores_prior_consumption() {
        let mut lot = test_lot(100, 2_000_000);
        lot.quantity_remaining = 10;
        // Still priced against the 100 received units.
        assert_eq!(lot.cost_of(10), 200_000);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(Lot::new(LotId::new(), None, 0, 100, Utc::now()).is_err());
        assert!(Lot::new(LotId::new(), None, -5, 100, Utc::now()).is_err());
    }
}
