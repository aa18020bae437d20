//! Installations domain module (meter points and their distributors).
//!
//! Deterministic domain logic only (no IO, no storage).

pub mod distributor;
pub mod installation;

pub use distributor::{Distributor, DistributorId, Tariff};
pub use installation::{
    DeactivateInstallation, Installation, InstallationCommand, InstallationDeactivated,
    InstallationEvent, InstallationId, InstallationKind, InstallationRegistered,
    InstallationStatus, OwnerReassigned, ReassignOwner, RegisterInstallation,
};
