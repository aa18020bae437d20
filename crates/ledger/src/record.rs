//! Raw period inputs and the ledger records derived from them.

use serde::{Deserialize, Serialize};

use raas_core::{DomainError, DomainResult, Energy, Period};
use raas_installations::{InstallationId, InstallationKind};

/// Raw meter input for one installation and one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReading {
    pub period: Period,
    pub consumption: Energy,
    /// Present for generators only.
    pub generation: Option<Energy>,
}

impl PeriodReading {
    pub fn consumer(period: Period, consumption: Energy) -> Self {
        Self {
            period,
            consumption,
            generation: None,
        }
    }

    pub fn generator(period: Period, generation: Energy, consumption: Energy) -> Self {
        Self {
            period,
            consumption,
            generation: Some(generation),
        }
    }

    /// Builds a reading from kWh values, rejecting negative or non-finite ones.
    pub fn from_kwh(period: Period, consumption_kwh: f64, generation_kwh: Option<f64>) -> DomainResult<Self> {
        let consumption = Energy::from_kwh(consumption_kwh).map_err(|e| {
            DomainError::validation(format!("{period}: consumption: {e}"))
        })?;
        let generation = generation_kwh
            .map(Energy::from_kwh)
            .transpose()
            .map_err(|e| DomainError::validation(format!("{period}: generation: {e}")))?;
        Ok(Self {
            period,
            consumption,
            generation,
        })
    }

    /// Checks the reading carries the inputs its installation kind needs.
    pub fn validate_for(&self, kind: InstallationKind) -> DomainResult<()> {
        match (kind, self.generation) {
            (InstallationKind::Generator, None) => Err(DomainError::validation(format!(
                "{}: generator reading has no generation",
                self.period
            ))),
            (InstallationKind::Consumer, Some(_)) => Err(DomainError::validation(format!(
                "{}: consumer reading reports generation",
                self.period
            ))),
            _ => Ok(()),
        }
    }
}

/// Monthly energy ledger record for one installation.
///
/// Records are derived only from the installation's previous balance and the
/// period's raw inputs, and are never edited once posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    pub period: Period,
    pub consumption: Energy,
    /// Generators only.
    pub generation: Option<Energy>,
    /// Generators only.
    pub transferred: Option<Energy>,
    /// Consumers only: sum of quota shares of generator transfers.
    pub received: Option<Energy>,
    pub compensation: Energy,
    pub previous_balance: Energy,
    pub current_balance: Energy,
    pub expiring_balance: Energy,
    /// `period + horizon` while a balance is carried.
    pub expiring_period: Option<Period>,
}

impl LedgerRecord {
    /// `previous_balance + received` for consumers; `None` for generators.
    pub fn available(&self) -> Option<Energy> {
        let received = self.received?;
        self.previous_balance.checked_add(received)
    }

    /// Consumption left for the distributor to bill at full price.
    pub fn uncompensated(&self) -> Energy {
        self.consumption.saturating_sub(self.compensation)
    }

    /// Re-checks the arithmetic invariants of a record.
    pub fn validate(&self) -> DomainResult<()> {
        if self.compensation > self.consumption {
            return Err(DomainError::invariant(format!(
                "{}: compensation {} exceeds consumption {}",
                self.period, self.compensation, self.consumption
            )));
        }

        match self.kind {
            InstallationKind::Generator => {
                let generation = self.generation.ok_or_else(|| {
                    DomainError::invariant(format!("{}: generator record without generation", self.period))
                })?;
                if self.received.is_some() {
                    return Err(DomainError::invariant(format!(
                        "{}: generator record cannot receive energy",
                        self.period
                    )));
                }
                if self.transferred != Some(generation.saturating_sub(self.consumption)) {
                    return Err(DomainError::invariant(format!(
                        "{}: transferred energy does not match generation surplus",
                        self.period
                    )));
                }
                if self.compensation != generation.min(self.consumption) {
                    return Err(DomainError::invariant(format!(
                        "{}: generator compensation must equal self-consumption",
                        self.period
                    )));
                }
                if self.current_balance != self.previous_balance {
                    return Err(DomainError::invariant(format!(
                        "{}: generator balance must carry unchanged",
                        self.period
                    )));
                }
            }
            InstallationKind::Consumer => {
                if self.generation.is_some() || self.transferred.is_some() {
                    return Err(DomainError::invariant(format!(
                        "{}: consumer record cannot generate or transfer",
                        self.period
                    )));
                }
                let available = self.available().ok_or_else(|| {
                    DomainError::invariant(format!(
                        "{}: consumer record without received energy",
                        self.period
                    ))
                })?;
                if self.compensation > available {
                    return Err(DomainError::invariant(format!(
                        "{}: compensation {} exceeds available {}",
                        self.period, self.compensation, available
                    )));
                }
                if self.current_balance != available.saturating_sub(self.compensation) {
                    return Err(DomainError::invariant(format!(
                        "{}: current balance must equal available minus compensation",
                        self.period
                    )));
                }
            }
        }

        match (self.current_balance.is_zero(), self.expiring_period) {
            (true, None) if self.expiring_balance.is_zero() => Ok(()),
            (false, Some(expires)) if self.expiring_balance == self.current_balance => {
                if expires <= self.period {
                    return Err(DomainError::invariant(format!(
                        "{}: balance expiring in {expires} is already expired",
                        self.period
                    )));
                }
                Ok(())
            }
            _ => Err(DomainError::invariant(format!(
                "{}: expiring balance must mirror the carried balance",
                self.period
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raas_core::AggregateId;

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn consumer_record() -> LedgerRecord {
        LedgerRecord {
            installation_id: InstallationId::new(AggregateId::new()),
            kind: InstallationKind::Consumer,
            period: p("01/2024"),
            consumption: Energy::kwh(5_000),
            generation: None,
            transferred: None,
            received: Some(Energy::kwh(8_140)),
            compensation: Energy::kwh(5_000),
            previous_balance: Energy::ZERO,
            current_balance: Energy::kwh(3_140),
            expiring_balance: Energy::kwh(3_140),
            expiring_period: Some(p("01/2029")),
        }
    }

    #[test]
    fn readings_reject_negative_kwh() {
        let err = PeriodReading::from_kwh(p("02/2024"), -1.0, None).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.starts_with("02/2024: consumption")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(PeriodReading::from_kwh(p("02/2024"), 1.0, Some(-3.0)).is_err());
    }

    #[test]
    fn readings_must_match_installation_kind() {
        let consumer = PeriodReading::consumer(p("01/2024"), Energy::kwh(10));
        assert!(consumer.validate_for(InstallationKind::Consumer).is_ok());
        assert!(consumer.validate_for(InstallationKind::Generator).is_err());

        let generator = PeriodReading::generator(p("01/2024"), Energy::kwh(100), Energy::kwh(10));
        assert!(generator.validate_for(InstallationKind::Generator).is_ok());
        assert!(generator.validate_for(InstallationKind::Consumer).is_err());
    }

    #[test]
    fn valid_consumer_record_passes() {
        let record = consumer_record();
        assert!(record.validate().is_ok());
        assert_eq!(record.available(), Some(Energy::kwh(8_140)));
        assert_eq!(record.uncompensated(), Energy::ZERO);
    }

    #[test]
    fn over_compensation_is_rejected() {
        let mut record = consumer_record();
        record.received = Some(Energy::kwh(100));
        assert!(matches!(record.validate(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn inconsistent_balance_is_rejected() {
        let mut record = consumer_record();
        record.current_balance = Energy::kwh(3_000);
        record.expiring_balance = Energy::kwh(3_000);
        assert!(record.validate().is_err());
    }

    #[test]
    fn expiring_fields_must_mirror_balance() {
        let mut record = consumer_record();
        record.expiring_period = None;
        assert!(record.validate().is_err());

        let mut record = consumer_record();
        record.expiring_period = Some(p("01/2024"));
        assert!(record.validate().is_err());
    }

    #[test]
    fn stored_record_keeps_exact_wh_and_period_labels() {
        let mut record = consumer_record();
        record.consumption = Energy::from_wh(5_000_500);
        record.compensation = Energy::from_wh(5_000_500);
        record.current_balance = Energy::from_wh(3_139_500);
        record.expiring_balance = Energy::from_wh(3_139_500);

        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["kind"], "consumer");
        assert_eq!(json["period"], "01/2024");
        assert_eq!(json["expiring_period"], "01/2029");
        assert_eq!(json["consumption"], 5_000_500);
        assert!(json["generation"].is_null());

        let back: LedgerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert!(back.validate().is_ok());
    }
}
