//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attributes:
/// two `Energy` amounts of 3 140 kWh are the same amount, two `Period`s
/// labelled `03/2024` are the same month. They are immutable; arithmetic
/// returns a new value.
///
/// Contrast with entities such as `Installation` or `Distributor`, which keep
/// their identity while their attributes change.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
