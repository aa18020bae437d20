//! Settings file (TOML).
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use raas_core::Quota;
use raas_ledger::{CREDIT_EXPIRATION_MONTHS, LedgerPolicy, MissingPeriodPolicy};
use raas_observability::LoggingConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ledger: LedgerSettings,
    pub billing: BillingSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Months until carried credit expires.
    pub expiration_months: u32,
    pub missing_period: MissingPeriodPolicy,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            expiration_months: CREDIT_EXPIRATION_MONTHS,
            missing_period: MissingPeriodPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    /// Operator discount on the distributor tariff, 0–100.
    pub discount_percent: f64,
    /// Days between issue and due date.
    pub due_days: u32,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            discount_percent: 0.0,
            due_days: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.expiration_months == 0 {
            return Err(ConfigError::Validation(
                "ledger.expiration_months must be at least 1".to_string(),
            ));
        }
        self.discount()?;
        Ok(())
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            expiration_months: self.ledger.expiration_months,
            missing_period: self.ledger.missing_period,
        }
    }

    pub fn discount(&self) -> Result<Quota, ConfigError> {
        Quota::from_percent(self.billing.discount_percent)
            .map_err(|e| ConfigError::Validation(format!("billing.discount_percent: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.ledger_policy(), LedgerPolicy::default());
        assert_eq!(settings.billing.due_days, 10);
        assert_eq!(settings.logging, LoggingConfig::default());
    }

    #[test]
    fn parses_all_sections() {
        let settings = Settings::from_toml(
            r#"
            [ledger]
            expiration_months = 36
            missing_period = "carry_forward"

            [billing]
            discount_percent = 12.5
            due_days = 15

            [logging]
            filter = "raas_infra=debug,info"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.ledger_policy().expiration_months, 36);
        assert_eq!(settings.ledger_policy().missing_period, MissingPeriodPolicy::CarryForward);
        assert_eq!(settings.discount().unwrap().basis_points(), 1_250);
        assert!(settings.logging.json);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = Settings::from_toml("[billing]\ndiscount_percent = 120.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.starts_with("billing.discount_percent")));

        let err = Settings::from_toml("[ledger]\nexpiration_months = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = Settings::from_toml("[ledger]\nmissing_period = \"interpolate\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
