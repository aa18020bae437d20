use serde::{Deserialize, Serialize};

use raas_core::{DomainResult, Energy, Quota};
use raas_installations::Tariff;

/// Amounts owed for compensated energy, in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// What the distributor would have charged for the energy.
    pub full_amount: u64,
    pub discount_amount: u64,
    /// `full_amount - discount_amount`; what the consumer pays the operator.
    pub total_amount: u64,
}

/// Prices compensated energy at the distributor tariff minus the operator's
/// discount. Both divisions round down.
pub fn price_compensation(compensated: Energy, tariff: Tariff, discount: Quota) -> DomainResult<Pricing> {
    let full_amount = tariff.price_cents(compensated)?;
    let discount_amount = discount.share_of_amount(full_amount);
    Ok(Pricing {
        full_amount,
        discount_amount,
        total_amount: full_amount - discount_amount,
    })
}
