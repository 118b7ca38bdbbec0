//! `stocklot-infra` — event stores, command execution, read models, and
//! the application services exposing the ledger core's operations.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod unit_of_work;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent, StreamAppend,
    UncommittedEvent,
};
pub use unit_of_work::UnitOfWork;
