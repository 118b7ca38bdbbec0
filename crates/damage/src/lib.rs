//! `stocklot-damage` — pending damage records and threshold-driven
//! supplier returns.

pub mod pending;

pub use pending::{
    DamageRecord, DamageRecorded, DamageSource, DamageSourceKind, DamageStatus, QueueForReturn,
    QueuedProduct, RETURN_THRESHOLD, RecordDamage, ReturnQueued, SupplierDamage,
    SupplierDamageCommand, SupplierDamageEvent, SupplierDamageId,
};
