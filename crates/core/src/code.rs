//! Human-facing reference codes derived from generated identifiers.
//!
//! Codes are a pure function of the entity's own uuid, so concurrent
//! creation never races on a shared counter.

use uuid::Uuid;

/// Derive a reference code from a prefix and the entity's generated id.
///
/// Takes the first eight hex digits of the uuid. UUIDv7 ids are
/// time-ordered, so codes sort roughly by creation time.
pub fn reference_code(prefix: &str, id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("{}-{}", prefix, hex[..8].to_uppercase())
}

/// Prefix for goods-receipt orders.
pub const RECEIPT_PREFIX: &str = "GRN";
/// Prefix for outgoing allocation (picking) orders.
pub const PICKING_PREFIX: &str = "PCK";
/// Prefix for supplier return orders.
pub const RETURN_PREFIX: &str = "RTN";
/// Prefix for stock counts.
pub const STOCK_COUNT_PREFIX: &str = "CNT";
