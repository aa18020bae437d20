use serde::{Deserialize, Serialize};
use uuid::Uuid;

use raas_core::{AggregateId, TenantId};

/// A committed event together with its stream metadata.
///
/// `sequence_number` is the event's position in its aggregate stream, so for
/// an energy ledger it increases by one for every posted period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap the payload (e.g. after decoding a JSON payload into a typed event).
    pub fn map_payload<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence_number: self.sequence_number,
            payload: f(self.payload),
        }
    }
}
