//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓ 1. load stream (tenant-scoped) and validate it
//!   ↓ 2. rehydrate the aggregate
//!   ↓ 3. handle the command (pure decision)
//!   ↓ 4. append with ExpectedVersion::Exact(stream version)
//! committed events
//! ```
//!
//! Ledger, allocation, installation and invoice writes all take this path,
//! so every write-time invariant is checked against current state and two
//! concurrent writers to one stream cannot both succeed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use raas_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure or conflicting write.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Cross-tenant or cross-aggregate stream mixing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Periods out of order or a broken ledger chain.
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// A stored payload no longer deserializes into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::Sequencing(msg) => DispatchError::Sequencing(msg),
        }
    }
}

impl DispatchError {
    /// True when the command was rejected by a business rule rather than by
    /// the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, DispatchError::Store(_) | DispatchError::Deserialize(_))
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store so tests run against [`InMemoryEventStore`] and a
/// durable backend can be swapped in without touching domain code.
///
/// [`InMemoryEventStore`]: crate::event_store::InMemoryEventStore
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Runs `command` against the current state of one aggregate and appends
    /// the resulting events.
    ///
    /// Returns the committed events; an empty vector when the command was a
    /// no-op. `make_aggregate` builds the empty aggregate to replay into.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: raas_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let history = self.store.load_stream(tenant_id, &aggregate_type, aggregate_id)?;
        validate_loaded_stream(tenant_id, &aggregate_type, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.store.append(uncommitted, expected)?)
    }

    /// Rehydrates an aggregate without issuing a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_type, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_type, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_type: &str,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(DispatchError::Store(EventStoreError::AggregateTypeMismatch(format!(
                "loaded stream contains '{}' at index {idx}, expected '{aggregate_type}'",
                e.aggregate_type
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use raas_core::AggregateRoot;
    use raas_installations::{
        DistributorId, Installation, InstallationCommand, InstallationId, InstallationKind,
        RegisterInstallation,
    };

    use crate::event_store::InMemoryEventStore;

    fn register(tenant_id: TenantId, id: InstallationId) -> InstallationCommand {
        InstallationCommand::RegisterInstallation(RegisterInstallation {
            tenant_id,
            installation_id: id,
            kind: InstallationKind::Consumer,
            meter_code: "UC-100".to_string(),
            owner: raas_core::UserId::new(),
            distributor_id: DistributorId::new(AggregateId::new()),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_appends_and_load_rehydrates() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());

        let committed = dispatcher
            .dispatch(tenant_id, id.0, "installations.installation", register(tenant_id, id), |_, a| {
                Installation::empty(InstallationId::new(a))
            })
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].event_type, "installations.installation.registered");

        let loaded: Installation = dispatcher
            .load(tenant_id, "installations.installation", id.0, |_, a| Installation::empty(InstallationId::new(a)))
            .unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.meter_code(), "UC-100");
    }

    #[test]
    fn domain_rejection_maps_to_dispatch_error() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());
        let make = |_: TenantId, a: AggregateId| Installation::empty(InstallationId::new(a));

        dispatcher
            .dispatch(tenant_id, id.0, "installations.installation", register(tenant_id, id), make)
            .unwrap();
        let err = dispatcher
            .dispatch(tenant_id, id.0, "installations.installation", register(tenant_id, id), make)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert!(err.is_rejection());
    }

    #[test]
    fn domain_errors_keep_their_category() {
        assert!(matches!(
            DispatchError::from(DomainError::sequencing("02/2024 after 03/2024")),
            DispatchError::Sequencing(_)
        ));
        assert!(matches!(
            DispatchError::from(DomainError::not_found("installation UC-9")),
            DispatchError::NotFound(what) if what == "installation UC-9"
        ));
        assert!(!DispatchError::Store(EventStoreError::Unavailable("down".into())).is_rejection());
    }
}
