//! `stocklot-stock` — the inventory ledger core.
//!
//! Owns lots, ledger entries, serial units, and the FIFO allocation engine,
//! all behind the per-product `ProductStock` aggregate.

pub mod fifo;
pub mod ledger;
pub mod lot;
pub mod product_stock;
pub mod serial;

pub use fifo::{LotDraw, available, pick_serials, plan_draws};
pub use ledger::{EntryKind, LedgerEntry, MovementRef, ReferenceKind};
pub use lot::{Lot, LotId};
pub use product_stock::{
    AdjustVariance, AllocateStock, BalanceAdjusted, DamageWrittenOff, DeductDamaged, LotReceived,
    OpenProductStock, ProductStock, ProductStockCommand, ProductStockEvent, ProductStockId,
    ProductStockOpened, ReceiveLot, StockAllocated,
};
pub use serial::{SerialId, SerialStatus, SerialUnit, mint_serial_code};
