//! Event primitives shared by the event-sourced aggregates.
//!
//! Installations, allocations, energy ledgers and invoices all emit typed
//! events implementing [`Event`]; the infrastructure layer wraps them in
//! [`EventEnvelope`]s once they are committed to a stream.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
