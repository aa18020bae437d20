use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use raas_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use raas_events::Event;

use crate::distributor::DistributorId;

/// Installation identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(pub AggregateId);

impl InstallationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role of a meter point in the credit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationKind {
    /// Produces energy; its surplus is transferred to the pool.
    Generator,
    /// Uses energy; receives a quota share of a generator's surplus.
    Consumer,
}

impl InstallationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationKind::Generator => "generator",
            InstallationKind::Consumer => "consumer",
        }
    }
}

impl core::fmt::Display for InstallationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InstallationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generator" => Ok(InstallationKind::Generator),
            "consumer" => Ok(InstallationKind::Consumer),
            other => Err(DomainError::validation(format!(
                "installation kind must be 'generator' or 'consumer', got '{other}'"
            ))),
        }
    }
}

/// Installation status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Active,
    Deactivated,
}

/// Aggregate root: Installation (a metered connection point).
///
/// The ledger only ever reads installations; they change through the
/// administrative commands below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    id: InstallationId,
    tenant_id: Option<TenantId>,
    kind: InstallationKind,
    meter_code: String,
    owner: Option<UserId>,
    distributor_id: Option<DistributorId>,
    status: InstallationStatus,
    version: u64,
    created: bool,
}

impl Installation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InstallationId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: InstallationKind::Consumer,
            meter_code: String::new(),
            owner: None,
            distributor_id: None,
            status: InstallationStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InstallationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> InstallationKind {
        self.kind
    }

    pub fn meter_code(&self) -> &str {
        &self.meter_code
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn distributor_id(&self) -> Option<DistributorId> {
        self.distributor_id
    }

    pub fn status(&self) -> InstallationStatus {
        self.status
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    /// Deactivated installations keep their ledger history but take no new allocations.
    pub fn can_allocate(&self) -> bool {
        self.created && self.status == InstallationStatus::Active
    }
}

impl AggregateRoot for Installation {
    type Id = InstallationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterInstallation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInstallation {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    /// Utility meter number, used as the key in ingestion files.
    pub meter_code: String,
    pub owner: UserId,
    pub distributor_id: DistributorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReassignOwner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignOwner {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub new_owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateInstallation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateInstallation {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallationCommand {
    RegisterInstallation(RegisterInstallation),
    ReassignOwner(ReassignOwner),
    DeactivateInstallation(DeactivateInstallation),
}

/// Event: InstallationRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRegistered {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub kind: InstallationKind,
    pub meter_code: String,
    pub owner: UserId,
    pub distributor_id: DistributorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OwnerReassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReassigned {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub previous_owner: UserId,
    pub new_owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InstallationDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationDeactivated {
    pub tenant_id: TenantId,
    pub installation_id: InstallationId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallationEvent {
    InstallationRegistered(InstallationRegistered),
    OwnerReassigned(OwnerReassigned),
    InstallationDeactivated(InstallationDeactivated),
}

impl Event for InstallationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InstallationEvent::InstallationRegistered(_) => "installations.installation.registered",
            InstallationEvent::OwnerReassigned(_) => "installations.installation.owner_reassigned",
            InstallationEvent::InstallationDeactivated(_) => {
                "installations.installation.deactivated"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InstallationEvent::InstallationRegistered(e) => e.occurred_at,
            InstallationEvent::OwnerReassigned(e) => e.occurred_at,
            InstallationEvent::InstallationDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Installation {
    type Command = InstallationCommand;
    type Event = InstallationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InstallationEvent::InstallationRegistered(e) => {
                self.id = e.installation_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.meter_code = e.meter_code.clone();
                self.owner = Some(e.owner);
                self.distributor_id = Some(e.distributor_id);
                self.status = InstallationStatus::Active;
                self.created = true;
            }
            InstallationEvent::OwnerReassigned(e) => {
                self.owner = Some(e.new_owner);
            }
            InstallationEvent::InstallationDeactivated(_) => {
                self.status = InstallationStatus::Deactivated;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InstallationCommand::RegisterInstallation(cmd) => self.handle_register(cmd),
            InstallationCommand::ReassignOwner(cmd) => self.handle_reassign(cmd),
            InstallationCommand::DeactivateInstallation(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Installation {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_installation_id(&self, installation_id: InstallationId) -> Result<(), DomainError> {
        if self.id != installation_id {
            return Err(DomainError::invariant("installation_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("installation {}", self.id)));
        }
        Ok(())
    }

    fn handle_register(
        &self,
        cmd: &RegisterInstallation,
    ) -> Result<Vec<InstallationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("installation already registered"));
        }

        let meter_code = cmd.meter_code.trim();
        if meter_code.is_empty() {
            return Err(DomainError::validation("meter code cannot be empty"));
        }
        if meter_code.contains(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "meter code '{meter_code}' cannot contain whitespace"
            )));
        }

        Ok(vec![InstallationEvent::InstallationRegistered(
            InstallationRegistered {
                tenant_id: cmd.tenant_id,
                installation_id: cmd.installation_id,
                kind: cmd.kind,
                meter_code: meter_code.to_string(),
                owner: cmd.owner,
                distributor_id: cmd.distributor_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reassign(&self, cmd: &ReassignOwner) -> Result<Vec<InstallationEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_installation_id(cmd.installation_id)?;

        let previous_owner = self
            .owner
            .ok_or_else(|| DomainError::invariant("registered installation without owner"))?;
        if previous_owner == cmd.new_owner {
            return Ok(vec![]);
        }

        Ok(vec![InstallationEvent::OwnerReassigned(OwnerReassigned {
            tenant_id: cmd.tenant_id,
            installation_id: cmd.installation_id,
            previous_owner,
            new_owner: cmd.new_owner,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateInstallation,
    ) -> Result<Vec<InstallationEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_installation_id(cmd.installation_id)?;

        if self.status == InstallationStatus::Deactivated {
            return Err(DomainError::conflict("installation is already deactivated"));
        }

        Ok(vec![InstallationEvent::InstallationDeactivated(
            InstallationDeactivated {
                tenant_id: cmd.tenant_id,
                installation_id: cmd.installation_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_installation_id() -> InstallationId {
        InstallationId::new(AggregateId::new())
    }

    fn register_cmd(
        tenant_id: TenantId,
        installation_id: InstallationId,
        kind: InstallationKind,
        meter_code: &str,
    ) -> RegisterInstallation {
        RegisterInstallation {
            tenant_id,
            installation_id,
            kind,
            meter_code: meter_code.to_string(),
            owner: UserId::new(),
            distributor_id: DistributorId::new(AggregateId::new()),
            occurred_at: Utc::now(),
        }
    }

    fn registered(kind: InstallationKind) -> (Installation, TenantId, InstallationId) {
        let tenant_id = TenantId::new();
        let installation_id = test_installation_id();
        let mut installation = Installation::empty(installation_id);
        let events = installation
            .handle(&InstallationCommand::RegisterInstallation(register_cmd(
                tenant_id,
                installation_id,
                kind,
                "UC-100",
            )))
            .unwrap();
        installation.apply(&events[0]);
        (installation, tenant_id, installation_id)
    }

    #[test]
    fn register_emits_event_and_trims_meter_code() {
        let installation_id = test_installation_id();
        let installation = Installation::empty(installation_id);
        let tenant_id = TenantId::new();
        let cmd = register_cmd(tenant_id, installation_id, InstallationKind::Generator, "  GEN-1 ");

        let events = installation
            .handle(&InstallationCommand::RegisterInstallation(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            InstallationEvent::InstallationRegistered(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.kind, InstallationKind::Generator);
                assert_eq!(e.meter_code, "GEN-1");
            }
            other => panic!("Expected InstallationRegistered, got {other:?}"),
        }
    }

    #[test]
    fn register_rejects_blank_or_spaced_meter_codes() {
        let installation_id = test_installation_id();
        let installation = Installation::empty(installation_id);
        for bad in ["   ", "UC 100"] {
            let cmd = register_cmd(TenantId::new(), installation_id, InstallationKind::Consumer, bad);
            let err = installation
                .handle(&InstallationCommand::RegisterInstallation(cmd))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn register_twice_conflicts() {
        let (installation, tenant_id, installation_id) = registered(InstallationKind::Consumer);
        let cmd = register_cmd(tenant_id, installation_id, InstallationKind::Consumer, "UC-100");
        let err = installation
            .handle(&InstallationCommand::RegisterInstallation(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn reassign_owner_records_previous_owner() {
        let (mut installation, tenant_id, installation_id) = registered(InstallationKind::Consumer);
        let previous = installation.owner().unwrap();
        let new_owner = UserId::new();

        let events = installation
            .handle(&InstallationCommand::ReassignOwner(ReassignOwner {
                tenant_id,
                installation_id,
                new_owner,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            InstallationEvent::OwnerReassigned(e) => {
                assert_eq!(e.previous_owner, previous);
                assert_eq!(e.new_owner, new_owner);
            }
            other => panic!("Expected OwnerReassigned, got {other:?}"),
        }
        installation.apply(&events[0]);
        assert_eq!(installation.owner(), Some(new_owner));
        assert_eq!(installation.version(), 2);
    }

    #[test]
    fn reassign_to_same_owner_is_a_no_op() {
        let (installation, tenant_id, installation_id) = registered(InstallationKind::Generator);
        let events = installation
            .handle(&InstallationCommand::ReassignOwner(ReassignOwner {
                tenant_id,
                installation_id,
                new_owner: installation.owner().unwrap(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn deactivate_blocks_new_allocations_and_cannot_repeat() {
        let (mut installation, tenant_id, installation_id) = registered(InstallationKind::Consumer);
        assert!(installation.can_allocate());

        let cmd = DeactivateInstallation {
            tenant_id,
            installation_id,
            reason: Some("contract ended".to_string()),
            occurred_at: Utc::now(),
        };
        let events = installation
            .handle(&InstallationCommand::DeactivateInstallation(cmd.clone()))
            .unwrap();
        installation.apply(&events[0]);
        assert_eq!(installation.status(), InstallationStatus::Deactivated);
        assert!(!installation.can_allocate());

        let err = installation
            .handle(&InstallationCommand::DeactivateInstallation(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn commands_on_unregistered_installation_are_not_found() {
        let installation_id = test_installation_id();
        let installation = Installation::empty(installation_id);
        let err = installation
            .handle(&InstallationCommand::DeactivateInstallation(DeactivateInstallation {
                tenant_id: TenantId::new(),
                installation_id,
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn other_tenant_is_rejected() {
        let (installation, _tenant_id, installation_id) = registered(InstallationKind::Consumer);
        let err = installation
            .handle(&InstallationCommand::ReassignOwner(ReassignOwner {
                tenant_id: TenantId::new(),
                installation_id,
                new_owner: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Generator".parse::<InstallationKind>().unwrap(), InstallationKind::Generator);
        assert_eq!(" consumer ".parse::<InstallationKind>().unwrap(), InstallationKind::Consumer);
        assert!("battery".parse::<InstallationKind>().is_err());
    }
}
