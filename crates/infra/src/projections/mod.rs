//! Projection implementations (read model builders).
//!
//! Projections consume ledger events and build query-optimized read models.
//! They are rebuildable from the event store, partitioned by tenant and
//! idempotent under at-least-once delivery.

pub mod balances;

pub use balances::{BalanceProjection, BalanceProjectionError, InstallationBalance};
