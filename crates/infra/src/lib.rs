//! Infrastructure layer: event store, command dispatch, read models,
//! ingestion, settings and the settlement service that ties them together.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod export;
pub mod ingest;
pub mod projections;
pub mod read_model;
pub mod service;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, Settings};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore};
pub use ingest::{IngestError, Portfolio, ReadingSet};
pub use service::{BillingRun, IssuedInvoice, Registry, SettlementError, SettlementService};
