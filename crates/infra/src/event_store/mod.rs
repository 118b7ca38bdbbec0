//! Append-only event store boundary.
//!
//! An infrastructure-facing abstraction for storing and loading
//! warehouse-scoped event streams without storage assumptions, plus the
//! in-memory (tests/dev) and Postgres (durable) implementations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
