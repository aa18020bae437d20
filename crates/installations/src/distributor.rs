//! Energy distributors (utilities) and their per-kWh tariffs.

use serde::{Deserialize, Serialize};

use raas_core::{AggregateId, DomainError, DomainResult, Energy, Entity, ValueObject};

/// Distributor identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributorId(pub AggregateId);

impl DistributorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DistributorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Price of one kWh, in ten-thousandths of the currency unit.
///
/// 0.9512 per kWh is `Tariff(9512)`. Amounts priced with a tariff come out in
/// cents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tariff(u64);

impl ValueObject for Tariff {}

impl Tariff {
    /// Tariff units per currency unit.
    pub const SCALE: u64 = 10_000;

    pub fn from_units(units: u64) -> DomainResult<Self> {
        if units == 0 {
            return Err(DomainError::validation("tariff must be positive"));
        }
        Ok(Self(units))
    }

    /// Tariff from a price per kWh in currency units (e.g. `0.9512`).
    pub fn from_price_per_kwh(price: f64) -> DomainResult<Self> {
        if !price.is_finite() || price <= 0.0 {
            return Err(DomainError::validation(format!(
                "tariff must be a positive price per kWh, got {price}"
            )));
        }
        Self::from_units((price * Self::SCALE as f64).round() as u64)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn price_per_kwh(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Price of `energy` at this tariff, in cents (rounded down).
    ///
    /// Wh × units / 100 000: 1 000 Wh per kWh, 10 000 units per currency
    /// unit, 100 cents per currency unit.
    pub fn price_cents(&self, energy: Energy) -> DomainResult<u64> {
        let cents = u128::from(energy.as_wh()) * u128::from(self.0) / 100_000;
        u64::try_from(cents).map_err(|_| DomainError::invariant("priced amount overflow"))
    }
}

/// A utility distributor.
///
/// Not event-sourced: administrators edit the tariff in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distributor {
    id: DistributorId,
    code: String,
    name: String,
    tariff: Tariff,
}

impl Entity for Distributor {
    type Id = DistributorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Distributor {
    pub fn new(
        id: DistributorId,
        code: impl Into<String>,
        name: impl Into<String>,
        tariff: Tariff,
    ) -> DomainResult<Self> {
        let code = code.into().trim().to_string();
        let name = name.into().trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("distributor code cannot be empty"));
        }
        if name.is_empty() {
            return Err(DomainError::validation("distributor name cannot be empty"));
        }
        Ok(Self {
            id,
            code,
            name,
            tariff,
        })
    }

    pub fn id_typed(&self) -> DistributorId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tariff(&self) -> Tariff {
        self.tariff
    }

    pub fn update_tariff(&mut self, tariff: Tariff) {
        self.tariff = tariff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributor() -> Distributor {
        Distributor::new(
            DistributorId::new(AggregateId::new()),
            "CEMIG",
            "Cemig Distribuicao",
            Tariff::from_price_per_kwh(0.9512).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn tariff_prices_energy_in_cents() {
        let tariff = Tariff::from_price_per_kwh(0.9512).unwrap();
        assert_eq!(tariff.units(), 9_512);
        assert_eq!(tariff.price_cents(Energy::kwh(5_000)).unwrap(), 475_600);
        assert_eq!(tariff.price_cents(Energy::ZERO).unwrap(), 0);
    }

    #[test]
    fn tariff_must_be_positive() {
        assert!(Tariff::from_price_per_kwh(0.0).is_err());
        assert!(Tariff::from_price_per_kwh(-0.5).is_err());
        assert!(Tariff::from_price_per_kwh(f64::NAN).is_err());
        assert!(Tariff::from_units(0).is_err());
    }

    #[test]
    fn distributor_requires_code_and_name() {
        let tariff = Tariff::from_units(8_000).unwrap();
        let id = DistributorId::new(AggregateId::new());
        assert!(Distributor::new(id, " ", "Name", tariff).is_err());
        assert!(Distributor::new(id, "CODE", "", tariff).is_err());
    }

    #[test]
    fn update_tariff_keeps_identity() {
        let mut d = distributor();
        let id = *d.id();
        d.update_tariff(Tariff::from_units(10_250).unwrap());
        assert_eq!(*d.id(), id);
        assert_eq!(d.tariff().price_per_kwh(), 1.025);
    }
}
