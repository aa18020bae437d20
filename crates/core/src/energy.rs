//! Energy amounts and quota shares.
//!
//! Energy is held in whole watt-hours and quotas in basis points so that
//! ledger arithmetic is exact; kWh and percentages only appear at the edges.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

const WH_PER_KWH: f64 = 1_000.0;

/// Non-negative amount of energy, in watt-hours.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Energy(u64);

impl ValueObject for Energy {}

impl Energy {
    pub const ZERO: Energy = Energy(0);

    pub const fn from_wh(wh: u64) -> Self {
        Self(wh)
    }

    /// Whole kilowatt-hours (exact). Any `u32` fits without overflow.
    pub const fn kwh(kwh: u32) -> Self {
        Self(kwh as u64 * 1_000)
    }

    /// Converts a reading in kWh, rounding to the nearest Wh.
    ///
    /// Negative, NaN and infinite readings are rejected.
    pub fn from_kwh(kwh: f64) -> DomainResult<Self> {
        if !kwh.is_finite() {
            return Err(DomainError::validation(format!(
                "energy must be a finite number of kWh, got {kwh}"
            )));
        }
        if kwh < 0.0 {
            return Err(DomainError::validation(format!(
                "energy cannot be negative, got {kwh} kWh"
            )));
        }
        let wh = (kwh * WH_PER_KWH).round();
        if wh >= u64::MAX as f64 {
            return Err(DomainError::validation(format!("energy {kwh} kWh is too large")));
        }
        Ok(Self(wh as u64))
    }

    pub const fn as_wh(&self) -> u64 {
        self.0
    }

    pub fn as_kwh(&self) -> f64 {
        self.0 as f64 / WH_PER_KWH
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Energy) -> Option<Energy> {
        self.0.checked_add(other.0).map(Energy)
    }

    /// `self - other`, floored at zero.
    pub fn saturating_sub(self, other: Energy) -> Energy {
        Energy(self.0.saturating_sub(other.0))
    }

    /// Sum of an iterator, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Energy>>(iter: I) -> Option<Energy> {
        iter.into_iter()
            .try_fold(Energy::ZERO, |acc, e| acc.checked_add(e))
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} kWh", self.as_kwh())
    }
}

/// Share of a whole, in basis points (0..=10_000).
///
/// Used for allocation quotas (share of a generator's surplus) and invoice
/// discounts (share of the tariff).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quota(u32);

impl ValueObject for Quota {}

impl Quota {
    pub const MAX_BASIS_POINTS: u32 = 10_000;
    pub const ZERO: Quota = Quota(0);
    pub const FULL: Quota = Quota(Self::MAX_BASIS_POINTS);

    pub fn from_basis_points(bp: u32) -> DomainResult<Self> {
        if bp > Self::MAX_BASIS_POINTS {
            return Err(DomainError::validation(format!(
                "quota must be at most 100%, got {bp} basis points"
            )));
        }
        Ok(Self(bp))
    }

    /// Quota from a percentage in `0.0..=100.0`.
    pub fn from_percent(percent: f64) -> DomainResult<Self> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(DomainError::validation(format!(
                "quota percentage must be within 0-100, got {percent}"
            )));
        }
        Self::from_basis_points((percent * 100.0).round() as u32)
    }

    /// Quota from a decimal fraction in `0.0..=1.0`.
    pub fn from_fraction(fraction: f64) -> DomainResult<Self> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(DomainError::validation(format!(
                "quota fraction must be within 0-1, got {fraction}"
            )));
        }
        Self::from_basis_points((fraction * 10_000.0).round() as u32)
    }

    pub const fn basis_points(&self) -> u32 {
        self.0
    }

    pub fn as_percent(&self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn as_fraction(&self) -> f64 {
        f64::from(self.0) / 10_000.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Sum of two quotas; `None` if it would exceed 100%.
    pub fn checked_add(self, other: Quota) -> Option<Quota> {
        let sum = self.0 + other.0;
        (sum <= Self::MAX_BASIS_POINTS).then_some(Quota(sum))
    }

    /// What is left of 100% after this quota.
    pub fn remainder(self) -> Quota {
        Quota(Self::MAX_BASIS_POINTS - self.0)
    }

    /// This quota's share of `energy`, rounded down to the Wh.
    pub fn share_of(&self, energy: Energy) -> Energy {
        let wh = u128::from(energy.as_wh()) * u128::from(self.0)
            / u128::from(Self::MAX_BASIS_POINTS);
        // share <= energy, so this always fits.
        Energy::from_wh(wh as u64)
    }

    /// This quota's share of an integer amount (e.g. cents), rounded down.
    pub fn share_of_amount(&self, amount: u64) -> u64 {
        (u128::from(amount) * u128::from(self.0) / u128::from(Self::MAX_BASIS_POINTS)) as u64
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.as_percent())
    }
}
