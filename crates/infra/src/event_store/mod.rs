//! Append-only event store boundary.
//!
//! Installation, allocation, ledger and invoice streams all go through this
//! abstraction; nothing here assumes a storage engine.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
