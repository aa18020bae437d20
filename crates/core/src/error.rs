//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only deterministic business failures live here: bad input, broken ledger
/// invariants, ordering problems, conflicting writes. Storage and parsing
/// failures are wrapped by the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An input value failed validation (negative energy, quota out of range, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A ledger or allocation invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier or period label could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced installation, allocation or invoice does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting write (duplicate registration, stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Periods were supplied out of chronological order, duplicated, or with gaps.
    #[error("sequencing error: {0}")]
    Sequencing(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn sequencing(msg: impl Into<String>) -> Self {
        Self::Sequencing(msg.into())
    }

    /// True for errors caused by caller input rather than stored state.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidId(_) | Self::NotFound(_) | Self::Sequencing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified() {
        assert!(DomainError::validation("negative consumption").is_input_error());
        assert!(DomainError::sequencing("03/2024 after 04/2024").is_input_error());
        assert!(!DomainError::invariant("balance chain broken").is_input_error());
        assert!(!DomainError::conflict("already registered").is_input_error());
    }

    #[test]
    fn display_includes_context() {
        let err = DomainError::not_found("installation UC-9");
        assert_eq!(err.to_string(), "not found: installation UC-9");
    }
}
