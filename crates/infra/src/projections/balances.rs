use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use raas_core::{AggregateId, Energy, Period, TenantId};
use raas_events::EventEnvelope;
use raas_installations::{InstallationId, InstallationKind};
use raas_ledger::LedgerEvent;

/// Queryable read model: where each installation's ledger stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationBalance {
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    pub last_period: Option<Period>,
    pub balance: Energy,
    pub expiring_period: Option<Period>,
    pub total_consumption: Energy,
    pub total_compensation: Energy,
    /// Generators: surplus sent to the pool. Consumers: credit received.
    pub total_shared: Energy,
    pub periods_posted: u32,
}

impl InstallationBalance {
    fn opened(installation_id: InstallationId, kind: InstallationKind, balance: Energy) -> Self {
        Self {
            installation_id,
            kind,
            last_period: None,
            balance,
            expiring_period: None,
            total_consumption: Energy::ZERO,
            total_compensation: Energy::ZERO,
            total_shared: Energy::ZERO,
            periods_posted: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum BalanceProjectionError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("period posted to unopened ledger {0}")]
    UnopenedLedger(InstallationId),

    #[error("running total overflow for installation {0}")]
    Overflow(InstallationId),
}

/// Balance projection over energy ledger envelopes.
///
/// Idempotent under at-least-once delivery: envelopes at or below the
/// stream's cursor are ignored. Disposable and rebuildable from the store.
#[derive(Debug)]
pub struct BalanceProjection<S>
where
    S: crate::read_model::TenantStore<InstallationId, InstallationBalance>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> BalanceProjection<S>
where
    S: crate::read_model::TenantStore<InstallationId, InstallationBalance>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, installation_id: &InstallationId) -> Option<InstallationBalance> {
        self.store.get(tenant_id, installation_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<InstallationBalance> {
        self.store.list(tenant_id)
    }

    /// Sum of carried consumer credit for a tenant.
    pub fn outstanding_credit(&self, tenant_id: TenantId) -> Option<Energy> {
        Energy::checked_sum(self.list(tenant_id).into_iter().map(|b| b.balance))
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), BalanceProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };
        let key = CursorKey { tenant_id, aggregate_id };
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(BalanceProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(BalanceProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| BalanceProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, installation_id) = match &event {
            LedgerEvent::Opened(e) => (e.tenant_id, e.installation_id),
            LedgerEvent::PeriodPosted(e) => (e.tenant_id, e.installation_id),
        };
        if event_tenant != tenant_id {
            return Err(BalanceProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if installation_id.0 != aggregate_id {
            return Err(BalanceProjectionError::TenantIsolation(
                "event installation_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            LedgerEvent::Opened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.installation_id,
                    InstallationBalance::opened(e.installation_id, e.kind, e.opening_balance),
                );
            }
            LedgerEvent::PeriodPosted(e) => {
                let mut rm = self
                    .store
                    .get(tenant_id, &e.installation_id)
                    .ok_or(BalanceProjectionError::UnopenedLedger(e.installation_id))?;
                let record = e.record;
                let shared = record.transferred.or(record.received).unwrap_or_default();
                let overflow = || BalanceProjectionError::Overflow(e.installation_id);

                rm.last_period = Some(record.period);
                rm.balance = record.current_balance;
                rm.expiring_period = record.expiring_period;
                rm.total_consumption = rm.total_consumption.checked_add(record.consumption).ok_or_else(overflow)?;
                rm.total_compensation = rm.total_compensation.checked_add(record.compensation).ok_or_else(overflow)?;
                rm.total_shared = rm.total_shared.checked_add(shared).ok_or_else(overflow)?;
                rm.periods_posted += 1;
                self.store.upsert(tenant_id, e.installation_id, rm);
            }
        }

        cursors.insert(key, seq);
        Ok(())
    }

    /// Rebuilds one tenant's read model by replaying envelopes in stream order.
    pub fn rebuild(
        &self,
        tenant_id: TenantId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BalanceProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
        self.store.clear_tenant(tenant_id);

        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| e.tenant_id() == tenant_id)
            .collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use raas_ledger::{
        drive_installation, LedgerOpened, LedgerPolicy, PeriodPosted, PeriodReading,
    };
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    fn envelope(tenant_id: TenantId, id: InstallationId, seq: u64, event: &LedgerEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            id.0,
            "ledger.energy",
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn ledger_events(tenant_id: TenantId, id: InstallationId) -> Vec<LedgerEvent> {
        let readings = vec![
            PeriodReading::consumer("01/2024".parse().unwrap(), Energy::kwh(5_000)),
            PeriodReading::consumer("02/2024".parse().unwrap(), Energy::kwh(1_000)),
        ];
        let records = drive_installation(
            id,
            InstallationKind::Consumer,
            Energy::ZERO,
            &readings,
            |p| if p.month() == 1 { Energy::kwh(8_140) } else { Energy::ZERO },
            &LedgerPolicy::default(),
        )
        .unwrap();

        let mut events = vec![LedgerEvent::Opened(LedgerOpened {
            tenant_id,
            installation_id: id,
            kind: InstallationKind::Consumer,
            opening_balance: Energy::ZERO,
            occurred_at: Utc::now(),
        })];
        events.extend(records.into_iter().map(|record| {
            LedgerEvent::PeriodPosted(PeriodPosted {
                tenant_id,
                installation_id: id,
                record,
                occurred_at: Utc::now(),
            })
        }));
        events
    }

    #[test]
    fn tracks_balance_and_totals() {
        let projection = BalanceProjection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());

        for (i, ev) in ledger_events(tenant_id, id).iter().enumerate() {
            projection.apply_envelope(&envelope(tenant_id, id, i as u64 + 1, ev)).unwrap();
        }

        let rm = projection.get(tenant_id, &id).unwrap();
        assert_eq!(rm.balance, Energy::kwh(2_140));
        assert_eq!(rm.total_compensation, Energy::kwh(6_000));
        assert_eq!(rm.total_shared, Energy::kwh(8_140));
        assert_eq!(rm.periods_posted, 2);
        assert_eq!(rm.last_period, Some("02/2024".parse().unwrap()));
        assert_eq!(projection.outstanding_credit(tenant_id), Some(Energy::kwh(2_140)));
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let projection = BalanceProjection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());
        let events = ledger_events(tenant_id, id);

        projection.apply_envelope(&envelope(tenant_id, id, 1, &events[0])).unwrap();
        projection.apply_envelope(&envelope(tenant_id, id, 2, &events[1])).unwrap();
        projection.apply_envelope(&envelope(tenant_id, id, 2, &events[1])).unwrap();

        assert_eq!(projection.get(tenant_id, &id).unwrap().periods_posted, 1);
    }

    #[test]
    fn gap_in_sequence_is_rejected() {
        let projection = BalanceProjection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());
        let events = ledger_events(tenant_id, id);

        projection.apply_envelope(&envelope(tenant_id, id, 1, &events[0])).unwrap();
        let err = projection
            .apply_envelope(&envelope(tenant_id, id, 3, &events[2]))
            .unwrap_err();
        assert!(matches!(err, BalanceProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }

    #[test]
    fn rebuild_matches_incremental_application() {
        let projection = BalanceProjection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let id = InstallationId::new(AggregateId::new());
        let envs: Vec<_> = ledger_events(tenant_id, id)
            .iter()
            .enumerate()
            .map(|(i, ev)| envelope(tenant_id, id, i as u64 + 1, ev))
            .collect();

        for env in &envs {
            projection.apply_envelope(env).unwrap();
        }
        let incremental = projection.get(tenant_id, &id).unwrap();

        projection.rebuild(tenant_id, envs.into_iter().rev()).unwrap();
        assert_eq!(projection.get(tenant_id, &id).unwrap(), incremental);
    }
}
