//! Billing period: one calendar month, written `MM/YYYY`.

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A calendar month.
///
/// Ordering is chronological, so a `Vec<Period>` sorted ascending is in the
/// order the ledger must process it. Serialized as the `MM/YYYY` label.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    // Field order matters for the derived `Ord`.
    year: i32,
    month: u32,
}

impl ValueObject for Period {}

impl Period {
    pub fn new(month: u32, year: i32) -> DomainResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::invalid_id(format!(
                "period month must be 1-12, got {month}"
            )));
        }
        if !(1..=9999).contains(&year) {
            return Err(DomainError::invalid_id(format!(
                "period year must be 1-9999, got {year}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Period containing the given date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of the month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    fn index(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_index(index: i64) -> Option<Self> {
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
        Self::new(month, year).ok()
    }

    /// The period `months` months later. `None` past year 9999.
    pub fn plus_months(&self, months: u32) -> Option<Self> {
        Self::from_index(self.index() + i64::from(months))
    }

    pub fn next(&self) -> Option<Self> {
        self.plus_months(1)
    }

    /// Signed number of months from `earlier` to `self`.
    pub fn months_since(&self, earlier: Period) -> i64 {
        self.index() - earlier.index()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month, self.year)
    }
}

impl FromStr for Period {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (month, year) = trimmed
            .split_once('/')
            .ok_or_else(|| DomainError::invalid_id(format!("period '{trimmed}' is not MM/YYYY")))?;
        if month.len() != 2 || year.len() != 4 {
            return Err(DomainError::invalid_id(format!(
                "period '{trimmed}' is not MM/YYYY"
            )));
        }
        let month: u32 = month
            .parse()
            .map_err(|_| DomainError::invalid_id(format!("period '{trimmed}' has a bad month")))?;
        let year: i32 = year
            .parse()
            .map_err(|_| DomainError::invalid_id(format!("period '{trimmed}' has a bad year")))?;
        Self::new(month, year)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}
