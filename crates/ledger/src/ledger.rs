use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use raas_core::{Aggregate, AggregateRoot, DomainError, Energy, Period, TenantId};
use raas_events::Event;
use raas_installations::{InstallationId, InstallationKind};

use crate::record::LedgerRecord;

/// Aggregate root: the energy ledger of one installation.
///
/// The aggregate id is the installation id. Posted records form a chain: each
/// period is later than the last one posted and starts from the balance the
/// previous one closed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyLedger {
    id: InstallationId,
    tenant_id: Option<TenantId>,
    kind: Option<InstallationKind>,
    last_period: Option<Period>,
    balance: Energy,
    version: u64,
}

impl EnergyLedger {
    /// Empty aggregate for rehydration.
    pub fn empty(id: InstallationId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: None,
            last_period: None,
            balance: Energy::ZERO,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> InstallationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> Option<InstallationKind> {
        self.kind
    }

    pub fn last_period(&self) -> Option<Period> {
        self.last_period
    }

    /// Balance carried into the next period.
    pub fn balance(&self) -> Energy {
        self.balance
    }

    pub fn is_open(&self) -> bool {
        self.kind.is_some()
    }
}

impl AggregateRoot for EnergyLedger {
    type Id = InstallationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenLedger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLedger {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    /// Credit carried over from before this ledger existed.
    pub opening_balance: Energy,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostPeriod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPeriod {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub record: LedgerRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Open(OpenLedger),
    PostPeriod(PostPeriod),
}

/// Event: LedgerOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOpened {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    pub opening_balance: Energy,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PeriodPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPosted {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub record: LedgerRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    Opened(LedgerOpened),
    PeriodPosted(PeriodPosted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::Opened(_) => "ledger.energy.opened",
            LedgerEvent::PeriodPosted(_) => "ledger.energy.period_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::Opened(e) => e.occurred_at,
            LedgerEvent::PeriodPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for EnergyLedger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::Opened(e) => {
                self.id = e.installation_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = Some(e.kind);
                self.balance = e.opening_balance;
            }
            LedgerEvent::PeriodPosted(e) => {
                self.last_period = Some(e.record.period);
                self.balance = e.record.current_balance;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::Open(cmd) => self.handle_open(cmd),
            LedgerCommand::PostPeriod(cmd) => self.handle_post(cmd),
        }
    }
}

impl EnergyLedger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if let Some(existing) = self.tenant_id {
            if existing != tenant_id {
                return Err(DomainError::invariant("tenant mismatch"));
            }
        }
        Ok(())
    }

    fn ensure_installation_id(&self, installation_id: InstallationId) -> Result<(), DomainError> {
        if self.id != installation_id {
            return Err(DomainError::invariant("installation_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenLedger) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_installation_id(cmd.installation_id)?;

        if self.is_open() {
            return Err(DomainError::conflict(format!(
                "ledger for installation {} already open",
                cmd.installation_id
            )));
        }
        if cmd.kind == InstallationKind::Generator && !cmd.opening_balance.is_zero() {
            return Err(DomainError::validation("generators carry no credit balance"));
        }

        Ok(vec![LedgerEvent::Opened(LedgerOpened {
            tenant_id: cmd.tenant_id,
            installation_id: cmd.installation_id,
            kind: cmd.kind,
            opening_balance: cmd.opening_balance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostPeriod) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_installation_id(cmd.installation_id)?;

        let kind = self.kind.ok_or_else(|| {
            DomainError::not_found(format!("ledger for installation {}", cmd.installation_id))
        })?;

        let record = &cmd.record;
        if record.installation_id != cmd.installation_id {
            return Err(DomainError::invariant("record belongs to another installation"));
        }
        if record.kind != kind {
            return Err(DomainError::invariant(format!(
                "{} record posted to a {kind} ledger",
                record.kind
            )));
        }
        if let Some(last) = self.last_period {
            if record.period <= last {
                return Err(DomainError::sequencing(format!(
                    "period {} is not after last posted period {last}",
                    record.period
                )));
            }
        }
        if record.previous_balance != self.balance {
            return Err(DomainError::invariant(format!(
                "{}: previous balance {} does not match carried balance {}",
                record.period, record.previous_balance, self.balance
            )));
        }
        record.validate()?;

        Ok(vec![LedgerEvent::PeriodPosted(PeriodPosted {
            tenant_id: cmd.tenant_id,
            installation_id: cmd.installation_id,
            record: *record,
            occurred_at: cmd.occurred_at,
        })])
    }
}
