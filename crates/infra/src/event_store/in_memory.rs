use std::collections::BTreeMap;
use std::sync::RwLock;

use raas_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_type: String,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Streams are kept in key order (tenant, type, id) so rebuilds replay
/// deterministically and `load_by_type` is a range scan.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };

        let tenant_id = first.tenant_id;
        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            tenant_id,
            aggregate_type,
            aggregate_id,
        };

        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();
        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        };

        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_by_type(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        Ok(streams
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id && key.aggregate_type == aggregate_type)
            .flat_map(|(_, stream)| stream.iter())
            .cloned()
            .collect())
    }
}
