//! FIFO consumption planning.
//!
//! Pure functions over lot and serial lists; the aggregate turns a plan
//! into events only after every check has passed, so a failed plan never
//! mutates anything.

use serde::{Deserialize, Serialize};

use stocklot_core::{DomainError, DomainResult, ValueObject};

use crate::lot::{Lot, LotId};
use crate::serial::{SerialId, SerialUnit};

/// One lot's contribution to a consumption plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: LotId,
    pub quantity: i64,
    /// Proportional cost of the drawn units, priced at the lot's receipt
    /// cost basis.
    pub cost: i64,
}

impl ValueObject for LotDraw {}

/// Total quantity remaining across all lots.
pub fn available(lots: &[Lot]) -> i64 {
    lots.iter().map(|l| l.quantity_remaining).sum()
}

/// Plan a FIFO consumption of `quantity` units.
///
/// Lots are walked ascending by `(received_at, lot_id)`, consuming
/// `min(quantity_remaining, still_needed)` from each until satisfied.
/// Fails with `InvalidQuantity` for non-positive requests and with
/// `InsufficientStock` when the lots cannot cover the request; no partial
/// plan is ever returned.
pub fn plan_draws(lots: &[Lot], quantity: i64) -> DomainResult<Vec<LotDraw>> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "requested quantity must be positive, got {quantity}"
        )));
    }

    let available = available(lots);
    if available < quantity {
        return Err(DomainError::insufficient_stock(quantity, available));
    }

    let mut open: Vec<&Lot> = lots.iter().filter(|l| l.quantity_remaining > 0).collect();
    open.sort_by_key(|l| (l.received_at, l.lot_id));

    let mut draws = Vec::new();
    let mut needed = quantity;
    for lot in open {
        if needed == 0 {
            break;
        }
        let take = lot.quantity_remaining.min(needed);
        draws.push(LotDraw {
            lot_id: lot.lot_id,
            quantity: take,
            cost: lot.cost_of(take),
        });
        needed -= take;
    }

    Ok(draws)
}

/// Pick `quantity` in-stock serial units, oldest first.
///
/// Ordering is `(received_at, serial_id)`, independent of which lot each
/// unit nominally belongs to. Fails with `InsufficientSerialUnits` when
/// fewer are in stock than requested, a distinct failure mode from
/// insufficient quantity.
pub fn pick_serials(serials: &[SerialUnit], quantity: i64) -> DomainResult<Vec<SerialId>> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "requested quantity must be positive, got {quantity}"
        )));
    }

    let mut in_stock: Vec<&SerialUnit> = serials.iter().filter(|s| s.is_in_stock()).collect();
    if (in_stock.len() as i64) < quantity {
        return Err(DomainError::insufficient_serials(
            quantity,
            in_stock.len() as i64,
        ));
    }

    in_stock.sort_by_key(|s| (s.received_at, s.serial_id));
    Ok(in_stock
        .into_iter()
        .take(quantity as usize)
        .map(|s| s.serial_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn lot_at(offset_secs: i64, quantity: i64, cost_total: i64) -> Lot {
        Lot::new(
            LotId::new(),
            None,
            quantity,
            cost_total,
            Utc::now() + Duration::seconds(offset_secs),
        )
        .unwrap()
    }

    #[test]
    fn draws_consume_oldest_lots_first() {
        let lots = vec![lot_at(0, 10, 100), lot_at(1, 10, 100), lot_at(2, 10, 100)];

        let draws = plan_draws(&lots, 15).unwrap();

        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].lot_id, lots[0].lot_id);
        assert_eq!(draws[0].quantity, 10);
        assert_eq!(draws[1].lot_id, lots[1].lot_id);
        assert_eq!(draws[1].quantity, 5);
    }

    #[test]
    fn same_instant_lots_tie_break_on_lot_id() {
        let at = Utc::now();
        let mut a = Lot::new(LotId::new(), None, 5, 0, at).unwrap();
        let mut b = Lot::new(LotId::new(), None, 5, 0, at).unwrap();
        if b.lot_id < a.lot_id {
            core::mem::swap(&mut a, &mut b);
        }

        let draws = plan_draws(&[b.clone(), a.clone()], 3).unwrap();
        assert_eq!(draws[0].lot_id, a.lot_id);
    }

    #[test]
    fn over_request_fails_without_a_plan() {
        let lots = vec![lot_at(0, 10, 100)];
        let err = plan_draws(&lots, 11).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 11,
                available: 10
            }
        );
    }

    #[test]
    fn non_positive_request_is_invalid() {
        assert!(matches!(
            plan_draws(&[], 0),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn depleted_lots_are_skipped() {
        let mut drained = lot_at(0, 10, 100);
        drained.quantity_remaining = 0;
        let fresh = lot_at(1, 10, 100);

        let draws = plan_draws(&[drained, fresh.clone()], 4).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].lot_id, fresh.lot_id);
    }
}
