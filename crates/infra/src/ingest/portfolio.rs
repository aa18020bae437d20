use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use raas_core::{Energy, Quota, UserId};
use raas_installations::{InstallationKind, Tariff};

use super::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorEntry {
    pub code: String,
    pub name: String,
    pub tariff_per_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationEntry {
    pub meter_code: String,
    pub kind: InstallationKind,
    /// Distributor code.
    pub distributor: String,
    #[serde(default)]
    pub owner: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub generator: String,
    pub consumer: String,
    pub quota_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningBalanceEntry {
    pub meter_code: String,
    pub balance_kwh: f64,
}

/// Static description of one operator's installations and how generator
/// surplus is shared between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Portfolio {
    pub distributors: Vec<DistributorEntry>,
    pub installations: Vec<InstallationEntry>,
    pub allocations: Vec<AllocationEntry>,
    pub opening_balances: Vec<OpeningBalanceEntry>,
}

impl Portfolio {
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, IngestError> {
        let portfolio: Self = toml::from_str(content)?;
        portfolio.validate()?;
        Ok(portfolio)
    }

    /// Reference and range checks that need no stored state.
    ///
    /// Quota sums are not checked here; they are enforced when allocations
    /// are written through the allocation aggregate.
    pub fn validate(&self) -> Result<(), IngestError> {
        let mut distributors = BTreeSet::new();
        for d in &self.distributors {
            if !distributors.insert(d.code.as_str()) {
                return Err(invalid(format!("distributor '{}' listed twice", d.code)));
            }
            self.tariff_of(d)?;
        }

        let mut kinds = BTreeMap::new();
        for i in &self.installations {
            if i.meter_code.trim().is_empty() {
                return Err(invalid("installation meter_code cannot be empty"));
            }
            if kinds.insert(i.meter_code.as_str(), i.kind).is_some() {
                return Err(invalid(format!("installation '{}' listed twice", i.meter_code)));
            }
            if !distributors.contains(i.distributor.as_str()) {
                return Err(invalid(format!(
                    "installation '{}' references unknown distributor '{}'",
                    i.meter_code, i.distributor
                )));
            }
        }

        let expect_kind = |code: &str, kind: InstallationKind, role: &str| match kinds.get(code) {
            None => Err(invalid(format!("{role} '{code}' is not a known installation"))),
            Some(k) if *k != kind => Err(invalid(format!("{role} '{code}' is a {k}, not a {kind}"))),
            Some(_) => Ok(()),
        };

        let mut pairs = BTreeSet::new();
        let mut allocated: BTreeMap<&str, u32> = BTreeMap::new();
        for a in &self.allocations {
            expect_kind(&a.generator, InstallationKind::Generator, "allocation generator")?;
            expect_kind(&a.consumer, InstallationKind::Consumer, "allocation consumer")?;
            if !pairs.insert((a.generator.as_str(), a.consumer.as_str())) {
                return Err(invalid(format!(
                    "allocation {} -> {} listed twice",
                    a.generator, a.consumer
                )));
            }
            let total = allocated.entry(a.generator.as_str()).or_default();
            *total += a.quota()?.basis_points();
            if *total > Quota::FULL.basis_points() {
                return Err(invalid(format!(
                    "allocations of generator '{}' exceed 100%",
                    a.generator
                )));
            }
        }

        let mut opened = BTreeSet::new();
        for b in &self.opening_balances {
            expect_kind(&b.meter_code, InstallationKind::Consumer, "opening balance")?;
            if !opened.insert(b.meter_code.as_str()) {
                return Err(invalid(format!("opening balance for '{}' listed twice", b.meter_code)));
            }
            b.balance()?;
        }

        Ok(())
    }

    pub fn installation(&self, meter_code: &str) -> Option<&InstallationEntry> {
        self.installations.iter().find(|i| i.meter_code == meter_code)
    }

    pub fn distributor(&self, code: &str) -> Option<&DistributorEntry> {
        self.distributors.iter().find(|d| d.code == code)
    }

    /// Opening balance for a meter; zero when none is listed.
    pub fn opening_balance(&self, meter_code: &str) -> Result<Energy, IngestError> {
        self.opening_balances
            .iter()
            .find(|b| b.meter_code == meter_code)
            .map(OpeningBalanceEntry::balance)
            .unwrap_or(Ok(Energy::ZERO))
    }

    pub fn tariff_of(&self, distributor: &DistributorEntry) -> Result<Tariff, IngestError> {
        Tariff::from_price_per_kwh(distributor.tariff_per_kwh)
            .map_err(|e| invalid(format!("distributor '{}': {e}", distributor.code)))
    }
}

impl AllocationEntry {
    pub fn quota(&self) -> Result<Quota, IngestError> {
        Quota::from_percent(self.quota_percent).map_err(|e| {
            invalid(format!("allocation {} -> {}: {e}", self.generator, self.consumer))
        })
    }
}

impl OpeningBalanceEntry {
    pub fn balance(&self) -> Result<Energy, IngestError> {
        Energy::from_kwh(self.balance_kwh)
            .map_err(|e| invalid(format!("opening balance for '{}': {e}", self.meter_code)))
    }
}

fn invalid(msg: impl Into<String>) -> IngestError {
    IngestError::Portfolio(msg.into())
}
