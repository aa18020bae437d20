use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use raas_core::{Aggregate, AggregateRoot, DomainError, Quota, TenantId};
use raas_events::Event;
use raas_installations::InstallationId;

/// One quota relationship: `consumer` receives `quota` of `generator`'s surplus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub quota: Quota,
}

/// Aggregate root: all allocations out of one generator.
///
/// The aggregate id is the generator's installation id, so every write that
/// touches a generator's quotas goes through one stream and the
/// "quotas sum to at most 100%" invariant is checked against current state.
/// Readers trust the stored quotas; nothing re-normalises them later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorAllocations {
    generator: InstallationId,
    tenant_id: Option<TenantId>,
    quotas: BTreeMap<InstallationId, Quota>,
    version: u64,
}

impl GeneratorAllocations {
    /// Empty aggregate for rehydration.
    pub fn empty(generator: InstallationId) -> Self {
        Self {
            generator,
            tenant_id: None,
            quotas: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn generator(&self) -> InstallationId {
        self.generator
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Allocations ordered by consumer id.
    pub fn allocations(&self) -> Vec<Allocation> {
        self.quotas
            .iter()
            .map(|(consumer, quota)| Allocation {
                generator: self.generator,
                consumer: *consumer,
                quota: *quota,
            })
            .collect()
    }

    pub fn quota_for(&self, consumer: InstallationId) -> Option<Quota> {
        self.quotas.get(&consumer).copied()
    }

    /// Sum of all quotas. Never above 100% for a stream built through `handle`.
    pub fn allocated_total(&self) -> Quota {
        let bp: u32 = self.quotas.values().map(Quota::basis_points).sum();
        Quota::from_basis_points(bp).unwrap_or(Quota::FULL)
    }

    /// Share of the surplus nobody holds a quota for.
    pub fn unallocated(&self) -> Quota {
        self.allocated_total().remainder()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}

impl AggregateRoot for GeneratorAllocations {
    type Id = InstallationId;

    fn id(&self) -> &Self::Id {
        &self.generator
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AllocateQuota (new consumer for this generator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateQuota {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub quota: Quota,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeQuota (existing consumer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeQuota {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub quota: Quota,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevokeAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeAllocation {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCommand {
    AllocateQuota(AllocateQuota),
    ChangeQuota(ChangeQuota),
    RevokeAllocation(RevokeAllocation),
}

/// Event: QuotaAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAllocated {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub quota: Quota,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotaChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaChanged {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub previous_quota: Quota,
    pub quota: Quota,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationRevoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRevoked {
    pub tenant_id: TenantId,
    pub generator: InstallationId,
    pub consumer: InstallationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    QuotaAllocated(QuotaAllocated),
    QuotaChanged(QuotaChanged),
    AllocationRevoked(AllocationRevoked),
}

impl Event for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::QuotaAllocated(_) => "allocation.generator.quota_allocated",
            AllocationEvent::QuotaChanged(_) => "allocation.generator.quota_changed",
            AllocationEvent::AllocationRevoked(_) => "allocation.generator.allocation_revoked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationEvent::QuotaAllocated(e) => e.occurred_at,
            AllocationEvent::QuotaChanged(e) => e.occurred_at,
            AllocationEvent::AllocationRevoked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for GeneratorAllocations {
    type Command = AllocationCommand;
    type Event = AllocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AllocationEvent::QuotaAllocated(e) => {
                self.generator = e.generator;
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                }
                self.quotas.insert(e.consumer, e.quota);
            }
            AllocationEvent::QuotaChanged(e) => {
                self.quotas.insert(e.consumer, e.quota);
            }
            AllocationEvent::AllocationRevoked(e) => {
                self.quotas.remove(&e.consumer);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AllocationCommand::AllocateQuota(cmd) => self.handle_allocate(cmd),
            AllocationCommand::ChangeQuota(cmd) => self.handle_change(cmd),
            AllocationCommand::RevokeAllocation(cmd) => self.handle_revoke(cmd),
        }
    }
}

impl GeneratorAllocations {
    fn ensure_scope(&self, tenant_id: TenantId, generator: InstallationId) -> Result<(), DomainError> {
        if let Some(existing) = self.tenant_id {
            if existing != tenant_id {
                return Err(DomainError::invariant("tenant mismatch"));
            }
        }
        if self.generator != generator {
            return Err(DomainError::invariant("generator mismatch"));
        }
        Ok(())
    }

    /// Total of every quota except `consumer`'s, plus `quota`; error above 100%.
    fn ensure_fits(&self, consumer: InstallationId, quota: Quota) -> Result<(), DomainError> {
        let others: u32 = self
            .quotas
            .iter()
            .filter(|(c, _)| **c != consumer)
            .map(|(_, q)| q.basis_points())
            .sum();
        let total = others + quota.basis_points();
        if total > Quota::MAX_BASIS_POINTS {
            return Err(DomainError::invariant(format!(
                "quotas for generator {} would total {:.2}% (max 100%)",
                self.generator,
                f64::from(total) / 100.0
            )));
        }
        Ok(())
    }

    fn handle_allocate(&self, cmd: &AllocateQuota) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.generator)?;

        if cmd.consumer == cmd.generator {
            return Err(DomainError::validation(
                "a generator cannot allocate a quota to itself",
            ));
        }
        if cmd.quota.is_zero() {
            return Err(DomainError::validation("quota must be greater than zero"));
        }
        if self.quotas.contains_key(&cmd.consumer) {
            return Err(DomainError::conflict(format!(
                "consumer {} already holds a quota of generator {}",
                cmd.consumer, cmd.generator
            )));
        }
        self.ensure_fits(cmd.consumer, cmd.quota)?;

        Ok(vec![AllocationEvent::QuotaAllocated(QuotaAllocated {
            tenant_id: cmd.tenant_id,
            generator: cmd.generator,
            consumer: cmd.consumer,
            quota: cmd.quota,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change(&self, cmd: &ChangeQuota) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.generator)?;

        let previous_quota = self.quota_for(cmd.consumer).ok_or_else(|| {
            DomainError::not_found(format!(
                "allocation {} -> {}",
                cmd.generator, cmd.consumer
            ))
        })?;
        if cmd.quota.is_zero() {
            return Err(DomainError::validation(
                "quota must be greater than zero; revoke the allocation instead",
            ));
        }
        if previous_quota == cmd.quota {
            return Ok(vec![]);
        }
        self.ensure_fits(cmd.consumer, cmd.quota)?;

        Ok(vec![AllocationEvent::QuotaChanged(QuotaChanged {
            tenant_id: cmd.tenant_id,
            generator: cmd.generator,
            consumer: cmd.consumer,
            previous_quota,
            quota: cmd.quota,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke(&self, cmd: &RevokeAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.generator)?;

        if !self.quotas.contains_key(&cmd.consumer) {
            return Err(DomainError::not_found(format!(
                "allocation {} -> {}",
                cmd.generator, cmd.consumer
            )));
        }

        Ok(vec![AllocationEvent::AllocationRevoked(AllocationRevoked {
            tenant_id: cmd.tenant_id,
            generator: cmd.generator,
            consumer: cmd.consumer,
            occurred_at: cmd.occurred_at,
        })])
    }
}
