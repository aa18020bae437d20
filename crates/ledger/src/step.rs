//! Single-period ledger steps.
//!
//! Both steps are pure: same inputs, same outputs, no hidden state. Inputs
//! are `Energy` values, which cannot be negative, so the only failure left is
//! arithmetic overflow.

use serde::{Deserialize, Serialize};

use raas_core::{DomainError, DomainResult, Energy};

/// Result of one generator period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorStep {
    /// Surplus sent to the pool: `max(0, generation - consumption)`.
    pub transferred: Energy,
    /// Part of the generation used on site: `min(generation, consumption)`.
    pub self_consumed: Energy,
}

/// The generator's own consumption is served first; only the rest is shared.
pub fn generator_step(generation: Energy, consumption: Energy) -> GeneratorStep {
    GeneratorStep {
        transferred: generation.saturating_sub(consumption),
        self_consumed: generation.min(consumption),
    }
}

/// Result of one consumer period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStep {
    /// `previous_balance + received`.
    pub available: Energy,
    /// `min(consumption, available)`.
    pub compensation: Energy,
    /// `available - compensation`, carried to the next period.
    pub current_balance: Energy,
}

/// Offsets `consumption` with the carried balance plus this period's share.
///
/// With nothing received and nothing carried, compensation is zero and the
/// whole consumption is billed by the distributor as usual.
pub fn consumer_step(
    previous_balance: Energy,
    consumption: Energy,
    received: Energy,
) -> DomainResult<ConsumerStep> {
    let available = previous_balance.checked_add(received).ok_or_else(|| {
        DomainError::invariant("available energy overflows (previous balance + received)")
    })?;
    let compensation = consumption.min(available);
    Ok(ConsumerStep {
        available,
        compensation,
        current_balance: available.saturating_sub(compensation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use raas_core::Quota;

    fn kwh(n: u32) -> Energy {
        Energy::kwh(n)
    }

    #[test]
    fn generator_scenario_transfers_surplus() {
        let step = generator_step(kwh(15_000), kwh(200));
        assert_eq!(step.transferred, kwh(14_800));
        assert_eq!(step.self_consumed, kwh(200));
    }

    #[test]
    fn generator_consuming_more_than_it_makes_transfers_nothing() {
        let step = generator_step(kwh(100), kwh(300));
        assert_eq!(step.transferred, Energy::ZERO);
        assert_eq!(step.self_consumed, kwh(100));
    }

    #[test]
    fn consumer_scenario_with_fresh_credit() {
        let received = Quota::from_fraction(0.55).unwrap().share_of(kwh(14_800));
        assert_eq!(received, kwh(8_140));

        let step = consumer_step(Energy::ZERO, kwh(5_000), received).unwrap();
        assert_eq!(step.compensation, kwh(5_000));
        assert_eq!(step.current_balance, kwh(3_140));
    }

    #[test]
    fn consumer_scenario_drawing_down_balance() {
        let step = consumer_step(kwh(3_140), kwh(10_000), Energy::ZERO).unwrap();
        assert_eq!(step.compensation, kwh(3_140));
        assert_eq!(step.current_balance, Energy::ZERO);
    }

    #[test]
    fn consumer_without_credit_pays_full_price() {
        let step = consumer_step(Energy::ZERO, kwh(750), Energy::ZERO).unwrap();
        assert_eq!(step.compensation, Energy::ZERO);
        assert_eq!(step.current_balance, Energy::ZERO);
    }

    #[test]
    fn overflowing_available_energy_is_an_invariant_violation() {
        let err = consumer_step(Energy::from_wh(u64::MAX), kwh(1), kwh(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    const MAX_WH: u64 = 1_000_000_000_000;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        #[test]
        fn transferred_is_surplus_or_zero(g in 0..MAX_WH, c in 0..MAX_WH) {
            let step = generator_step(Energy::from_wh(g), Energy::from_wh(c));
            prop_assert_eq!(step.transferred.as_wh(), g.saturating_sub(c));
            prop_assert_eq!(step.transferred.as_wh() + step.self_consumed.as_wh(), g);
        }

        #[test]
        fn compensation_is_bounded(p in 0..MAX_WH, c in 0..MAX_WH, r in 0..MAX_WH) {
            let step = consumer_step(Energy::from_wh(p), Energy::from_wh(c), Energy::from_wh(r)).unwrap();
            prop_assert!(step.compensation.as_wh() <= c);
            prop_assert!(step.compensation.as_wh() <= p + r);
        }

        #[test]
        fn balance_is_available_minus_compensation(p in 0..MAX_WH, c in 0..MAX_WH, r in 0..MAX_WH) {
            let step = consumer_step(Energy::from_wh(p), Energy::from_wh(c), Energy::from_wh(r)).unwrap();
            prop_assert_eq!(step.current_balance.as_wh(), p + r - step.compensation.as_wh());
        }

        #[test]
        fn consumer_step_is_idempotent(p in 0..MAX_WH, c in 0..MAX_WH, r in 0..MAX_WH) {
            let (p, c, r) = (Energy::from_wh(p), Energy::from_wh(c), Energy::from_wh(r));
            let first = consumer_step(p, c, r).unwrap();
            let second = consumer_step(p, c, r).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
