//! Period-iteration driver for a single installation.

use raas_core::{DomainError, DomainResult, Energy, Period};
use raas_installations::{InstallationId, InstallationKind};

use crate::policy::{LedgerPolicy, MissingPeriodPolicy};
use crate::record::{LedgerRecord, PeriodReading};
use crate::step::{consumer_step, generator_step};

/// Checks that readings are strictly increasing and, under
/// [`MissingPeriodPolicy::Fail`], contiguous.
pub fn validate_sequence(
    installation_id: InstallationId,
    readings: &[PeriodReading],
    policy: &LedgerPolicy,
) -> DomainResult<()> {
    for pair in readings.windows(2) {
        let (prev, cur) = (pair[0].period, pair[1].period);
        let gap = cur.months_since(prev);
        if gap == 0 {
            return Err(DomainError::sequencing(format!(
                "installation {installation_id}: period {cur} supplied twice"
            )));
        }
        if gap < 0 {
            return Err(DomainError::sequencing(format!(
                "installation {installation_id}: period {cur} supplied after {prev}"
            )));
        }
        if gap > 1 && policy.missing_period == MissingPeriodPolicy::Fail {
            return Err(DomainError::sequencing(format!(
                "installation {installation_id}: {} period(s) missing between {prev} and {cur}",
                gap - 1
            )));
        }
    }
    Ok(())
}

/// Applies one period to an installation's ledger.
///
/// `received` is ignored for generators. A generator's balance carries
/// unchanged: its whole surplus leaves through `transferred`.
pub fn post_reading(
    installation_id: InstallationId,
    kind: InstallationKind,
    previous_balance: Energy,
    reading: &PeriodReading,
    received: Energy,
    policy: &LedgerPolicy,
) -> DomainResult<LedgerRecord> {
    reading.validate_for(kind)?;

    let (generation, transferred, received, compensation, current_balance) = match kind {
        InstallationKind::Generator => {
            let generation = reading.generation.unwrap_or_default();
            let step = generator_step(generation, reading.consumption);
            (
                Some(generation),
                Some(step.transferred),
                None,
                step.self_consumed,
                previous_balance,
            )
        }
        InstallationKind::Consumer => {
            let step = consumer_step(previous_balance, reading.consumption, received)?;
            (
                None,
                None,
                Some(received),
                step.compensation,
                step.current_balance,
            )
        }
    };

    let (expiring_balance, expiring_period) = if current_balance.is_zero() {
        (Energy::ZERO, None)
    } else {
        let expires = reading
            .period
            .plus_months(policy.expiration_months)
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "{}: expiration period is out of range",
                    reading.period
                ))
            })?;
        (current_balance, Some(expires))
    };

    Ok(LedgerRecord {
        installation_id,
        kind,
        period: reading.period,
        consumption: reading.consumption,
        generation,
        transferred,
        received,
        compensation,
        previous_balance,
        current_balance,
        expiring_balance,
        expiring_period,
    })
}

/// Runs an installation's readings in chronological order, feeding each
/// period's closing balance into the next one.
///
/// `received_for` supplies a consumer's share of generator surplus for a
/// period. Readings must be ascending; the whole sequence is validated before
/// any record is produced, so an error never leaves a partial ledger.
pub fn drive_installation<F>(
    installation_id: InstallationId,
    kind: InstallationKind,
    opening_balance: Energy,
    readings: &[PeriodReading],
    mut received_for: F,
    policy: &LedgerPolicy,
) -> DomainResult<Vec<LedgerRecord>>
where
    F: FnMut(Period) -> Energy,
{
    validate_sequence(installation_id, readings, policy)?;
    for reading in readings {
        reading.validate_for(kind)?;
    }

    let (records, _closing) = readings.iter().try_fold(
        (Vec::with_capacity(readings.len()), opening_balance),
        |(mut records, balance), reading| {
            let received = match kind {
                InstallationKind::Consumer => received_for(reading.period),
                InstallationKind::Generator => Energy::ZERO,
            };
            let record = post_reading(installation_id, kind, balance, reading, received, policy)?;
            let closing = record.current_balance;
            records.push(record);
            Ok::<_, DomainError>((records, closing))
        },
    )?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use raas_core::{AggregateId, Quota};

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn kwh(n: u32) -> Energy {
        Energy::kwh(n)
    }

    fn id() -> InstallationId {
        InstallationId::new(AggregateId::new())
    }

    #[test]
    fn generator_sequence_reports_transfers() {
        let readings = vec![
            PeriodReading::generator(p("01/2024"), kwh(15_000), kwh(200)),
            PeriodReading::generator(p("02/2024"), kwh(100), kwh(300)),
        ];
        let records = drive_installation(
            id(),
            InstallationKind::Generator,
            Energy::ZERO,
            &readings,
            |_| Energy::ZERO,
            &LedgerPolicy::default(),
        )
        .unwrap();

        assert_eq!(records[0].transferred, Some(kwh(14_800)));
        assert_eq!(records[0].compensation, kwh(200));
        assert_eq!(records[1].transferred, Some(Energy::ZERO));
        assert_eq!(records[1].compensation, kwh(100));
        assert!(records.iter().all(|r| r.received.is_none() && r.current_balance.is_zero()));
        assert!(records.iter().all(|r| r.validate().is_ok()));
    }

    #[test]
    fn consumer_sequence_carries_balance_and_sets_expiration() {
        let quota = Quota::from_fraction(0.55).unwrap();
        let readings = vec![
            PeriodReading::consumer(p("01/2024"), kwh(5_000)),
            PeriodReading::consumer(p("02/2024"), kwh(10_000)),
        ];
        let transfers = |period: Period| {
            if period == p("01/2024") { kwh(14_800) } else { Energy::ZERO }
        };

        let records = drive_installation(
            id(),
            InstallationKind::Consumer,
            Energy::ZERO,
            &readings,
            |period| quota.share_of(transfers(period)),
            &LedgerPolicy::default(),
        )
        .unwrap();

        let jan = &records[0];
        assert_eq!(jan.received, Some(kwh(8_140)));
        assert_eq!(jan.compensation, kwh(5_000));
        assert_eq!(jan.current_balance, kwh(3_140));
        assert_eq!(jan.expiring_balance, kwh(3_140));
        assert_eq!(jan.expiring_period, Some(p("01/2029")));

        let feb = &records[1];
        assert_eq!(feb.previous_balance, kwh(3_140));
        assert_eq!(feb.compensation, kwh(3_140));
        assert_eq!(feb.current_balance, Energy::ZERO);
        assert_eq!(feb.expiring_balance, Energy::ZERO);
        assert_eq!(feb.expiring_period, None);
        assert_eq!(feb.uncompensated(), kwh(6_860));
    }

    #[test]
    fn out_of_order_periods_are_rejected() {
        let readings = vec![
            PeriodReading::consumer(p("02/2024"), kwh(1)),
            PeriodReading::consumer(p("01/2024"), kwh(1)),
        ];
        let err = drive_installation(
            id(),
            InstallationKind::Consumer,
            Energy::ZERO,
            &readings,
            |_| Energy::ZERO,
            &LedgerPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Sequencing(_)));
    }

    #[test]
    fn duplicate_periods_are_rejected_under_any_policy() {
        let readings = vec![
            PeriodReading::consumer(p("01/2024"), kwh(1)),
            PeriodReading::consumer(p("01/2024"), kwh(1)),
        ];
        let err = validate_sequence(id(), &readings, &LedgerPolicy::carry_forward()).unwrap_err();
        assert!(matches!(err, DomainError::Sequencing(msg) if msg.contains("twice")));
    }

    #[test]
    fn gaps_fail_by_default() {
        let readings = vec![
            PeriodReading::consumer(p("01/2024"), kwh(1)),
            PeriodReading::consumer(p("04/2024"), kwh(1)),
        ];
        let err = validate_sequence(id(), &readings, &LedgerPolicy::default()).unwrap_err();
        assert!(matches!(err, DomainError::Sequencing(msg) if msg.contains("2 period(s) missing")));
    }

    #[test]
    fn gaps_carry_balance_under_carry_forward() {
        let readings = vec![
            PeriodReading::consumer(p("01/2024"), kwh(1_000)),
            PeriodReading::consumer(p("04/2024"), kwh(500)),
        ];
        let records = drive_installation(
            id(),
            InstallationKind::Consumer,
            kwh(2_000),
            &readings,
            |_| Energy::ZERO,
            &LedgerPolicy::carry_forward(),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].current_balance, kwh(1_000));
        assert_eq!(records[1].previous_balance, kwh(1_000));
        assert_eq!(records[1].current_balance, kwh(500));
    }

    #[test]
    fn wrong_reading_kind_fails_before_any_record() {
        let readings = vec![
            PeriodReading::consumer(p("01/2024"), kwh(1)),
            PeriodReading::generator(p("02/2024"), kwh(5), kwh(1)),
        ];
        let err = drive_installation(
            id(),
            InstallationKind::Consumer,
            Energy::ZERO,
            &readings,
            |_| Energy::ZERO,
            &LedgerPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn custom_horizon_is_used() {
        let policy = LedgerPolicy {
            expiration_months: 12,
            ..LedgerPolicy::default()
        };
        let readings = vec![PeriodReading::consumer(p("06/2024"), kwh(1))];
        let records = drive_installation(
            id(),
            InstallationKind::Consumer,
            kwh(10),
            &readings,
            |_| Energy::ZERO,
            &policy,
        )
        .unwrap();
        assert_eq!(records[0].expiring_period, Some(p("06/2025")));
    }

    const MAX_WH: u64 = 100_000_000_000;

    proptest! {
        /// Chaining three periods equals three sequential single steps, and
        /// differs in general from one step on the cumulative totals.
        #[test]
        fn chained_periods_match_sequential_steps(
            inputs in prop::collection::vec((0..MAX_WH, 0..MAX_WH), 3),
            opening in 0..MAX_WH,
        ) {
            let periods = [p("01/2024"), p("02/2024"), p("03/2024")];
            let readings: Vec<PeriodReading> = periods
                .iter()
                .zip(&inputs)
                .map(|(period, (c, _))| PeriodReading::consumer(*period, Energy::from_wh(*c)))
                .collect();
            let received: Vec<Energy> = inputs.iter().map(|(_, r)| Energy::from_wh(*r)).collect();

            let records = drive_installation(
                id(),
                InstallationKind::Consumer,
                Energy::from_wh(opening),
                &readings,
                |period| received[period.months_since(periods[0]) as usize],
                &LedgerPolicy::default(),
            )
            .unwrap();

            let mut balance = Energy::from_wh(opening);
            for (i, (c, r)) in inputs.iter().enumerate() {
                let step = crate::step::consumer_step(balance, Energy::from_wh(*c), Energy::from_wh(*r)).unwrap();
                prop_assert_eq!(records[i].previous_balance, balance);
                prop_assert_eq!(records[i].compensation, step.compensation);
                balance = step.current_balance;
            }
            prop_assert_eq!(records[2].current_balance, balance);
            prop_assert!(records.iter().all(|r| r.validate().is_ok()));
        }
    }

    #[test]
    fn chained_result_differs_from_cumulative_one_shot() {
        // Credit arrives after the consumption it could have offset.
        let periods = [p("01/2024"), p("02/2024"), p("03/2024")];
        let consumption = [kwh(1_000), Energy::ZERO, Energy::ZERO];
        let received = [Energy::ZERO, Energy::ZERO, kwh(1_000)];
        let readings: Vec<PeriodReading> = periods
            .iter()
            .zip(consumption)
            .map(|(period, c)| PeriodReading::consumer(*period, c))
            .collect();

        let records = drive_installation(
            id(),
            InstallationKind::Consumer,
            Energy::ZERO,
            &readings,
            |period| received[period.months_since(periods[0]) as usize],
            &LedgerPolicy::default(),
        )
        .unwrap();

        let one_shot = crate::step::consumer_step(Energy::ZERO, kwh(1_000), kwh(1_000)).unwrap();
        assert_eq!(records[2].current_balance, kwh(1_000));
        assert_eq!(one_shot.current_balance, Energy::ZERO);
    }
}
