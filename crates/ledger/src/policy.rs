//! Settlement policy knobs.

use serde::{Deserialize, Serialize};

/// Months after which carried credit expires.
pub const CREDIT_EXPIRATION_MONTHS: u32 = 60;

/// What to do when an installation's readings skip a period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPeriodPolicy {
    /// Reject the whole sequence with a sequencing error.
    #[default]
    Fail,
    /// Emit no record for the gap and carry the balance forward unchanged.
    CarryForward,
}

/// Parameters shared by every settlement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    pub expiration_months: u32,
    pub missing_period: MissingPeriodPolicy,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            expiration_months: CREDIT_EXPIRATION_MONTHS,
            missing_period: MissingPeriodPolicy::Fail,
        }
    }
}

impl LedgerPolicy {
    pub fn carry_forward() -> Self {
        Self {
            missing_period: MissingPeriodPolicy::CarryForward,
            ..Self::default()
        }
    }
}
