//! Allocation domain module: quota shares of generator surplus (event-sourced).
//!
//! Enforces, on every write, that a generator's quotas never sum above 100%.

pub mod allocation;

pub use allocation::{
    AllocateQuota, Allocation, AllocationCommand, AllocationEvent, AllocationRevoked,
    ChangeQuota, GeneratorAllocations, QuotaAllocated, QuotaChanged, RevokeAllocation,
};
