//! Disposable, rebuildable read-model storage.

pub mod warehouse_store;

pub use warehouse_store::{InMemoryWarehouseStore, WarehouseStore};
