//! Read-model projections fed from the event bus.

pub mod damage_summary;
pub mod stock_levels;

pub use damage_summary::{
    DamageProjectionError, DamageSummaryProjection, PendingDamageRecord, PendingDamageSummary,
};
pub use stock_levels::{StockLevelReadModel, StockLevelsProjection, StockProjectionError};
