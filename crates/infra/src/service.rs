//! Settlement service: wires ingestion, the pure pool fold, the
//! event-sourced aggregates and the balance projection together.
//!
//! ```text
//! Portfolio ─ load_portfolio ─▶ Installation / GeneratorAllocations / EnergyLedger streams
//! ReadingSet ─ settle ─▶ settle_pool (pure) ─▶ PostPeriod × N ─▶ BalanceProjection
//! PoolSettlement ─ issue_invoices ─▶ Invoice streams
//! ```
//!
//! `settle` computes the whole pool before posting anything, so an input or
//! sequencing error leaves every ledger stream untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use raas_allocation::{AllocateQuota, Allocation, AllocationCommand, GeneratorAllocations};
use raas_core::{AggregateId, DomainError, Energy, Period, Quota, TenantId, UserId};
use raas_installations::{
    Distributor, DistributorId, Installation, InstallationCommand, InstallationId,
    InstallationKind, RegisterInstallation, Tariff,
};
use raas_invoicing::{Invoice, InvoiceCommand, InvoiceId, IssueInvoice};
use raas_ledger::{
    EnergyLedger, InstallationInput, LedgerCommand, LedgerPolicy, LedgerRecord,
    MissingPeriodPolicy, OpenLedger, PeriodReading, PoolInput, PoolSettlement, PostPeriod,
    settle_pool,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::ingest::{IngestError, Portfolio, ReadingSet};
use crate::projections::balances::{BalanceProjection, BalanceProjectionError, InstallationBalance};
use crate::read_model::InMemoryTenantStore;

pub const INSTALLATION_AGGREGATE: &str = "installations.installation";
pub const ALLOCATION_AGGREGATE: &str = "allocation.generator";
pub const LEDGER_AGGREGATE: &str = "ledger.energy";
pub const INVOICE_AGGREGATE: &str = "invoicing.invoice";

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] BalanceProjectionError),

    #[error("readings reference unknown meter code '{0}'")]
    UnknownMeter(String),

    #[error("meter code '{0}' is already registered")]
    DuplicateMeter(String),
}

/// A registered installation as the service knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredInstallation {
    pub id: InstallationId,
    pub meter_code: String,
    pub kind: InstallationKind,
    pub distributor: DistributorId,
}

/// Meter-code and id lookups over everything loaded into the service.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    distributors: BTreeMap<DistributorId, Distributor>,
    distributor_codes: BTreeMap<String, DistributorId>,
    by_meter: BTreeMap<String, RegisteredInstallation>,
    meters: BTreeMap<InstallationId, String>,
}

impl Registry {
    pub fn by_meter(&self, meter_code: &str) -> Option<&RegisteredInstallation> {
        self.by_meter.get(meter_code)
    }

    pub fn by_id(&self, id: InstallationId) -> Option<&RegisteredInstallation> {
        self.meters.get(&id).and_then(|code| self.by_meter.get(code))
    }

    pub fn meter_code(&self, id: InstallationId) -> Option<&str> {
        self.meters.get(&id).map(String::as_str)
    }

    pub fn distributor_by_code(&self, code: &str) -> Option<&Distributor> {
        self.distributor_codes
            .get(code)
            .and_then(|id| self.distributors.get(id))
    }

    pub fn tariff_for(&self, id: InstallationId) -> Option<Tariff> {
        let installation = self.by_id(id)?;
        self.distributors
            .get(&installation.distributor)
            .map(Distributor::tariff)
    }

    pub fn installations(&self) -> impl Iterator<Item = &RegisteredInstallation> {
        self.by_meter.values()
    }

    pub fn generators(&self) -> impl Iterator<Item = &RegisteredInstallation> {
        self.installations()
            .filter(|i| i.kind == InstallationKind::Generator)
    }

    pub fn len(&self) -> usize {
        self.by_meter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_meter.is_empty()
    }
}

/// Invoice issued for one consumer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvoice {
    pub meter_code: String,
    pub record: LedgerRecord,
    pub invoice: Invoice,
}

/// Billing inputs for [`SettlementService::issue_invoices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingRun {
    pub period: Period,
    pub discount: Quota,
    pub due_days: u32,
    pub issued_at: DateTime<Utc>,
}

/// One tenant's settlement pipeline over an event store.
pub struct SettlementService<S> {
    tenant_id: TenantId,
    dispatcher: CommandDispatcher<S>,
    projection: BalanceProjection<InMemoryTenantStore<InstallationId, InstallationBalance>>,
    policy: LedgerPolicy,
    registry: Registry,
}

impl<S> SettlementService<S>
where
    S: EventStore,
{
    pub fn new(store: S, tenant_id: TenantId, policy: LedgerPolicy) -> Self {
        Self {
            tenant_id,
            dispatcher: CommandDispatcher::new(store),
            projection: BalanceProjection::new(InMemoryTenantStore::new()),
            policy,
            registry: Registry::default(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S> {
        &self.dispatcher
    }

    /// Registers a portfolio's distributors, installations, allocations and
    /// opening balances.
    ///
    /// The portfolio is validated as a whole first, so a generator whose
    /// quotas would exceed 100% is rejected before anything is written.
    pub fn load_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), SettlementError> {
        portfolio.validate()?;
        let now = Utc::now();

        for entry in &portfolio.distributors {
            let tariff = portfolio.tariff_of(entry)?;
            let id = DistributorId::new(AggregateId::new());
            let distributor = Distributor::new(id, entry.code.as_str(), entry.name.as_str(), tariff)?;
            self.registry.distributor_codes.insert(distributor.code().to_string(), id);
            self.registry.distributors.insert(id, distributor);
        }

        for entry in &portfolio.installations {
            let distributor = self
                .registry
                .distributor_by_code(&entry.distributor)
                .map(Distributor::id_typed)
                .ok_or_else(|| DomainError::not_found(format!("distributor {}", entry.distributor)))?;
            let opening_balance = portfolio.opening_balance(&entry.meter_code)?;
            self.register_installation(
                &entry.meter_code,
                entry.kind,
                entry.owner.unwrap_or_default(),
                distributor,
                opening_balance,
                now,
            )?;
        }

        for entry in &portfolio.allocations {
            let generator = self.lookup(&entry.generator)?.id;
            let consumer = self.lookup(&entry.consumer)?.id;
            self.allocate(generator, consumer, entry.quota()?, now)?;
        }

        info!(
            tenant_id = %self.tenant_id,
            distributors = portfolio.distributors.len(),
            installations = portfolio.installations.len(),
            allocations = portfolio.allocations.len(),
            "portfolio loaded"
        );
        Ok(())
    }

    /// Registers one installation and opens its ledger.
    pub fn register_installation(
        &mut self,
        meter_code: &str,
        kind: InstallationKind,
        owner: UserId,
        distributor: DistributorId,
        opening_balance: Energy,
        occurred_at: DateTime<Utc>,
    ) -> Result<InstallationId, SettlementError> {
        if self.registry.by_meter.contains_key(meter_code) {
            return Err(SettlementError::DuplicateMeter(meter_code.to_string()));
        }
        let id = InstallationId::new(AggregateId::new());
        let tenant_id = self.tenant_id;

        self.dispatcher.dispatch(
            tenant_id,
            id.0,
            INSTALLATION_AGGREGATE,
            InstallationCommand::RegisterInstallation(RegisterInstallation {
                tenant_id,
                installation_id: id,
                kind,
                meter_code: meter_code.to_string(),
                owner,
                distributor_id: distributor,
                occurred_at,
            }),
            |_, a| Installation::empty(InstallationId::new(a)),
        )?;

        self.dispatcher.dispatch(
            tenant_id,
            id.0,
            LEDGER_AGGREGATE,
            LedgerCommand::Open(OpenLedger {
                tenant_id,
                installation_id: id,
                kind,
                opening_balance,
                occurred_at,
            }),
            |_, a| EnergyLedger::empty(InstallationId::new(a)),
        )?
        .iter()
        .try_for_each(|stored| self.project(stored))?;

        self.registry.by_meter.insert(
            meter_code.to_string(),
            RegisteredInstallation {
                id,
                meter_code: meter_code.to_string(),
                kind,
                distributor,
            },
        );
        self.registry.meters.insert(id, meter_code.to_string());
        debug!(meter_code, %kind, installation_id = %id, "installation registered");
        Ok(id)
    }

    /// Gives `consumer` a quota of `generator`'s surplus.
    pub fn allocate(
        &self,
        generator: InstallationId,
        consumer: InstallationId,
        quota: Quota,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        self.expect_kind(generator, InstallationKind::Generator)?;
        self.expect_kind(consumer, InstallationKind::Consumer)?;

        let tenant_id = self.tenant_id;
        self.dispatcher
            .dispatch(
                tenant_id,
                generator.0,
                ALLOCATION_AGGREGATE,
                AllocationCommand::AllocateQuota(AllocateQuota {
                    tenant_id,
                    generator,
                    consumer,
                    quota,
                    occurred_at,
                }),
                |_, a| GeneratorAllocations::empty(InstallationId::new(a)),
            )
            .inspect_err(|e| warn!(%generator, %consumer, error = %e, "allocation rejected"))?;
        Ok(())
    }

    /// Current allocations of every registered generator.
    pub fn allocations(&self) -> Result<Vec<Allocation>, SettlementError> {
        let mut all = Vec::new();
        for generator in self.registry.generators() {
            let state: GeneratorAllocations = self.dispatcher.load(
                self.tenant_id,
                ALLOCATION_AGGREGATE,
                generator.id.0,
                |_, a| GeneratorAllocations::empty(InstallationId::new(a)),
            )?;
            all.extend(state.allocations());
        }
        Ok(all)
    }

    pub fn ledger(&self, id: InstallationId) -> Result<EnergyLedger, SettlementError> {
        Ok(self.dispatcher.load(self.tenant_id, LEDGER_AGGREGATE, id.0, |_, a| {
            EnergyLedger::empty(InstallationId::new(a))
        })?)
    }

    /// Settles every period in `readings` and posts the records.
    ///
    /// Each installation continues from its ledger's carried balance. Nothing
    /// is posted unless the whole pool settles.
    pub fn settle(&self, readings: &ReadingSet) -> Result<PoolSettlement, SettlementError> {
        if let Some(unknown) = readings
            .meter_codes()
            .find(|code| self.registry.by_meter(code).is_none())
        {
            return Err(SettlementError::UnknownMeter(unknown.to_string()));
        }

        let mut input = PoolInput {
            allocations: self.allocations()?,
            ..PoolInput::default()
        };
        for installation in self.registry.installations() {
            let ledger = self.ledger(installation.id)?;
            let own = readings.get(&installation.meter_code).unwrap_or_default();
            self.check_continuation(installation, &ledger, own)?;

            let member = InstallationInput::new(installation.id, ledger.balance(), own.to_vec());
            match installation.kind {
                InstallationKind::Generator => input.generators.push(member),
                InstallationKind::Consumer => input.consumers.push(member),
            }
        }

        let settlement = settle_pool(&input, &self.policy)
            .inspect_err(|e| warn!(tenant_id = %self.tenant_id, error = %e, "settlement rejected"))?;
        for summary in &settlement.summaries {
            debug!(
                generator = self.registry.meter_code(summary.generator).unwrap_or_default(),
                period = %summary.period,
                transferred = %summary.transferred,
                distributed = %summary.distributed,
                forfeited = %summary.forfeited,
                "pool period settled"
            );
        }

        let occurred_at = Utc::now();
        for record in settlement.records_by_period() {
            self.post(record, occurred_at)?;
        }

        info!(
            tenant_id = %self.tenant_id,
            installations = settlement.records.len(),
            records = settlement.record_count(),
            "settlement posted"
        );
        Ok(settlement)
    }

    fn post(&self, record: &LedgerRecord, occurred_at: DateTime<Utc>) -> Result<(), SettlementError> {
        let tenant_id = self.tenant_id;
        let id = record.installation_id;
        let committed = self.dispatcher.dispatch(
            tenant_id,
            id.0,
            LEDGER_AGGREGATE,
            LedgerCommand::PostPeriod(PostPeriod {
                tenant_id,
                installation_id: id,
                record: *record,
                occurred_at,
            }),
            |_, a| EnergyLedger::empty(InstallationId::new(a)),
        )?;
        committed.iter().try_for_each(|stored| self.project(stored))
    }

    /// Readings must start after the ledger's last posted period, and under
    /// [`MissingPeriodPolicy::Fail`] directly after it.
    fn check_continuation(
        &self,
        installation: &RegisteredInstallation,
        ledger: &EnergyLedger,
        readings: &[PeriodReading],
    ) -> Result<(), DomainError> {
        let (Some(last), Some(first)) = (ledger.last_period(), readings.first()) else {
            return Ok(());
        };
        let gap = first.period.months_since(last);
        if gap <= 0 {
            return Err(DomainError::sequencing(format!(
                "{}: period {} already posted (last posted {last})",
                installation.meter_code, first.period
            )));
        }
        if gap > 1 && self.policy.missing_period == MissingPeriodPolicy::Fail {
            return Err(DomainError::sequencing(format!(
                "{}: {} period(s) missing between {last} and {}",
                installation.meter_code,
                gap - 1,
                first.period
            )));
        }
        Ok(())
    }

    /// Issues one invoice per consumer record of `run.period` with positive
    /// compensation.
    pub fn issue_invoices(
        &self,
        settlement: &PoolSettlement,
        run: &BillingRun,
    ) -> Result<Vec<IssuedInvoice>, SettlementError> {
        let tenant_id = self.tenant_id;
        let due_date = run.issued_at + Duration::days(i64::from(run.due_days));
        let mut issued = Vec::new();

        for record in settlement
            .records_by_period()
            .into_iter()
            .filter(|r| r.period == run.period)
            .filter(|r| r.kind == InstallationKind::Consumer && !r.compensation.is_zero())
        {
            let installation = self
                .registry
                .by_id(record.installation_id)
                .ok_or_else(|| DomainError::not_found(format!("installation {}", record.installation_id)))?;
            let tariff = self.registry.tariff_for(installation.id).ok_or_else(|| {
                DomainError::not_found(format!("tariff for {}", installation.meter_code))
            })?;

            let invoice_id = InvoiceId::new(AggregateId::new());
            let command = IssueInvoice::for_record(
                tenant_id,
                invoice_id,
                record,
                tariff,
                run.discount,
                due_date,
                run.issued_at,
            )?;
            self.dispatcher.dispatch(
                tenant_id,
                invoice_id.0,
                INVOICE_AGGREGATE,
                InvoiceCommand::IssueInvoice(command),
                |_, a| Invoice::empty(InvoiceId::new(a)),
            )?;
            let invoice: Invoice = self.dispatcher.load(tenant_id, INVOICE_AGGREGATE, invoice_id.0, |_, a| {
                Invoice::empty(InvoiceId::new(a))
            })?;

            issued.push(IssuedInvoice {
                meter_code: installation.meter_code.clone(),
                record: *record,
                invoice,
            });
        }

        info!(tenant_id = %tenant_id, period = %run.period, invoices = issued.len(), "invoices issued");
        Ok(issued)
    }

    pub fn balances(&self) -> Vec<InstallationBalance> {
        self.projection.list(self.tenant_id)
    }

    pub fn balance(&self, id: InstallationId) -> Option<InstallationBalance> {
        self.projection.get(self.tenant_id, &id)
    }

    /// Replays every ledger stream into a fresh balance read model.
    pub fn rebuild_balances(&self) -> Result<(), SettlementError> {
        let events = self.dispatcher.store().load_by_type(self.tenant_id, LEDGER_AGGREGATE)?;
        self.projection
            .rebuild(self.tenant_id, events.iter().map(StoredEvent::to_envelope))?;
        Ok(())
    }

    fn project(&self, stored: &StoredEvent) -> Result<(), SettlementError> {
        Ok(self.projection.apply_envelope(&stored.to_envelope())?)
    }

    fn expect_kind(&self, id: InstallationId, kind: InstallationKind) -> Result<(), DomainError> {
        match self.registry.by_id(id) {
            None => Err(DomainError::not_found(format!("{kind} installation {id}"))),
            Some(found) if found.kind != kind => Err(DomainError::validation(format!(
                "installation '{}' is a {}, not a {kind}",
                found.meter_code, found.kind
            ))),
            Some(_) => Ok(()),
        }
    }

    fn lookup(&self, meter_code: &str) -> Result<&RegisteredInstallation, SettlementError> {
        self.registry
            .by_meter(meter_code)
            .ok_or_else(|| SettlementError::UnknownMeter(meter_code.to_string()))
    }
}
