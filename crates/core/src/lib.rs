//! `raas-core` — domain building blocks for the Roof-as-a-Service ledger.
//!
//! Pure domain primitives only: identifiers, errors, billing periods and the
//! exact energy/quota units the ledger computes with.

pub mod aggregate;
pub mod energy;
pub mod entity;
pub mod error;
pub mod id;
pub mod period;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use energy::{Energy, Quota};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use period::Period;
pub use value_object::ValueObject;
