//! Tracing setup shared by the `raas` binary and tests.

/// Subscriber configuration and initialisation.
pub mod tracing;

pub use crate::tracing::{LoggingConfig, init};
