use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use raas_core::{Aggregate, AggregateRoot, AggregateId, DomainError, Energy, Period, Quota, TenantId};
use raas_events::Event;
use raas_installations::{InstallationId, InstallationKind, Tariff};
use raas_ledger::LedgerRecord;

use crate::pricing::{Pricing, price_compensation};

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

/// Aggregate root: the operator's invoice for one consumer and one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    status: InvoiceStatus,
    installation_id: Option<InstallationId>,
    period: Option<Period>,
    compensated: Energy,
    pricing: Option<Pricing>,
    due_date: Option<DateTime<Utc>>,
    total_paid: u64,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            status: InvoiceStatus::Open,
            installation_id: None,
            period: None,
            compensated: Energy::ZERO,
            pricing: None,
            due_date: None,
            total_paid: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn installation_id(&self) -> Option<InstallationId> {
        self.installation_id
    }

    pub fn period(&self) -> Option<Period> {
        self.period
    }

    pub fn compensated(&self) -> Energy {
        self.compensated
    }

    pub fn pricing(&self) -> Option<Pricing> {
        self.pricing
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn total_amount(&self) -> u64 {
        self.pricing.map(|p| p.total_amount).unwrap_or(0)
    }

    pub fn total_paid(&self) -> u64 {
        self.total_paid
    }

    pub fn outstanding_amount(&self) -> u64 {
        self.total_amount().saturating_sub(self.total_paid)
    }

    /// Invariant: cannot pay void invoice.
    pub fn can_accept_payment(&self) -> bool {
        self.status != InvoiceStatus::Void && self.outstanding_amount() > 0
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub installation_id: InstallationId,
    pub period: Period,
    /// Consumption offset by credit in the period.
    pub compensated: Energy,
    pub tariff: Tariff,
    pub discount: Quota,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl IssueInvoice {
    /// Builds the command for a posted consumer record.
    #[allow(clippy::too_many_arguments)]
    pub fn for_record(
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        record: &LedgerRecord,
        tariff: Tariff,
        discount: Quota,
        due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if record.kind != InstallationKind::Consumer {
            return Err(DomainError::validation(format!(
                "{}: only consumer records are invoiced",
                record.period
            )));
        }
        Ok(Self {
            tenant_id,
            invoice_id,
            installation_id: record.installation_id,
            period: record.period,
            compensated: record.compensation,
            tariff,
            discount,
            due_date,
            occurred_at,
        })
    }
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    /// Payment amount in cents.
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    VoidInvoice(VoidInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub installation_id: InstallationId,
    pub period: Period,
    pub compensated: Energy,
    pub tariff: Tariff,
    pub discount: Quota,
    pub pricing: Pricing,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub amount: u64,
    pub new_total_paid: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    InvoiceVoided(InvoiceVoided),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "invoicing.invoice.payment_registered",
            InvoiceEvent::InvoiceVoided(_) => "invoicing.invoice.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::InvoiceVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.installation_id = Some(e.installation_id);
                self.period = Some(e.period);
                self.compensated = e.compensated;
                self.pricing = Some(e.pricing);
                self.due_date = Some(e.due_date);
                self.total_paid = 0;
                self.status = if e.pricing.total_amount == 0 {
                    InvoiceStatus::Paid
                } else {
                    InvoiceStatus::Open
                };
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.total_paid = e.new_total_paid;
                if self.total_paid >= self.total_amount() {
                    self.status = InvoiceStatus::Paid;
                }
            }
            InvoiceEvent::InvoiceVoided(_) => {
                self.status = InvoiceStatus::Void;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::VoidInvoice(cmd) => self.handle_void(cmd),
        }
    }
}

impl Invoice {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("invoice {}", self.id)));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        self.ensure_invoice_id(cmd.invoice_id)?;

        if cmd.compensated.is_zero() {
            return Err(DomainError::validation(format!(
                "{}: nothing was compensated, no invoice is due",
                cmd.period
            )));
        }
        if cmd.due_date < cmd.occurred_at {
            return Err(DomainError::validation("due date cannot precede issue date"));
        }

        let pricing = price_compensation(cmd.compensated, cmd.tariff, cmd.discount)?;

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            installation_id: cmd.installation_id,
            period: cmd.period,
            compensated: cmd.compensated,
            tariff: cmd.tariff,
            discount: cmd.discount,
            pricing,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invariant(
                "cannot register payment on void or fully paid invoice",
            ));
        }

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_total_paid = self
            .total_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invariant("payment total overflow"))?;

        if new_total_paid > self.total_amount() {
            return Err(DomainError::invariant("cannot overpay invoice"));
        }

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            new_total_paid,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        match self.status {
            InvoiceStatus::Void => Err(DomainError::conflict("invoice is already void")),
            InvoiceStatus::Paid if self.total_paid > 0 => {
                Err(DomainError::invariant("cannot void a paid invoice"))
            }
            _ => Ok(vec![InvoiceEvent::InvoiceVoided(InvoiceVoided {
                tenant_id: cmd.tenant_id,
                invoice_id: cmd.invoice_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use raas_core::AggregateId;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn issue_cmd(tenant_id: TenantId, invoice_id: InvoiceId, compensated: Energy) -> IssueInvoice {
        let now = test_time();
        IssueInvoice {
            tenant_id,
            invoice_id,
            installation_id: InstallationId::new(AggregateId::new()),
            period: "01/2024".parse().unwrap(),
            compensated,
            tariff: Tariff::from_price_per_kwh(0.9512).unwrap(),
            discount: Quota::from_percent(15.0).unwrap(),
            due_date: now + Duration::days(10),
            occurred_at: now,
        }
    }

    fn issued(tenant_id: TenantId, invoice_id: InvoiceId) -> Invoice {
        let mut invoice = Invoice::empty(invoice_id);
        let events = invoice
            .handle(&InvoiceCommand::IssueInvoice(issue_cmd(
                tenant_id,
                invoice_id,
                Energy::kwh(5_000),
            )))
            .unwrap();
        invoice.apply(&events[0]);
        invoice
    }

    fn pay(invoice: &Invoice, tenant_id: TenantId, amount: u64) -> Result<Vec<InvoiceEvent>, DomainError> {
        invoice.handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
            tenant_id,
            invoice_id: invoice.id_typed(),
            amount,
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn issue_invoice_prices_compensated_energy() {
        let tenant_id = test_tenant_id();
        let invoice_id = test_invoice_id();
        let invoice = Invoice::empty(invoice_id);

        let events = invoice
            .handle(&InvoiceCommand::IssueInvoice(issue_cmd(
                tenant_id,
                invoice_id,
                Energy::kwh(5_000),
            )))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            InvoiceEvent::InvoiceIssued(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.invoice_id, invoice_id);
                assert_eq!(e.pricing.full_amount, 475_600);
                assert_eq!(e.pricing.discount_amount, 71_340);
                assert_eq!(e.pricing.total_amount, 404_260);
            }
            _ => panic!("Expected InvoiceIssued event"),
        }
    }

    #[test]
    fn nothing_compensated_means_no_invoice() {
        let invoice_id = test_invoice_id();
        let err = Invoice::empty(invoice_id)
            .handle(&InvoiceCommand::IssueInvoice(issue_cmd(
                test_tenant_id(),
                invoice_id,
                Energy::ZERO,
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn generator_records_are_not_invoiced() {
        let record = LedgerRecord {
            installation_id: InstallationId::new(AggregateId::new()),
            kind: InstallationKind::Generator,
            period: "01/2024".parse().unwrap(),
            consumption: Energy::kwh(200),
            generation: Some(Energy::kwh(15_000)),
            transferred: Some(Energy::kwh(14_800)),
            received: None,
            compensation: Energy::kwh(200),
            previous_balance: Energy::ZERO,
            current_balance: Energy::ZERO,
            expiring_balance: Energy::ZERO,
            expiring_period: None,
        };
        let err = IssueInvoice::for_record(
            test_tenant_id(),
            test_invoice_id(),
            &record,
            Tariff::from_units(9_512).unwrap(),
            Quota::ZERO,
            test_time(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cannot_issue_twice() {
        let tenant_id = test_tenant_id();
        let invoice = issued(tenant_id, test_invoice_id());
        let err = invoice
            .handle(&InvoiceCommand::IssueInvoice(issue_cmd(
                tenant_id,
                invoice.id_typed(),
                Energy::kwh(1),
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn payment_before_issue_is_not_found() {
        let invoice = Invoice::empty(test_invoice_id());
        let err = pay(&invoice, test_tenant_id(), 10).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn cannot_pay_void_invoice() {
        let tenant_id = test_tenant_id();
        let mut invoice = issued(tenant_id, test_invoice_id());

        let events = invoice
            .handle(&InvoiceCommand::VoidInvoice(VoidInvoice {
                tenant_id,
                invoice_id: invoice.id_typed(),
                reason: Some("meter reading disputed".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice.apply(&events[0]);
        assert_eq!(invoice.status(), InvoiceStatus::Void);

        match pay(&invoice, tenant_id, 50).unwrap_err() {
            DomainError::InvariantViolation(msg)
                if msg.contains("cannot register payment on void or fully paid invoice") => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cannot_overpay_invoice() {
        let tenant_id = test_tenant_id();
        let invoice = issued(tenant_id, test_invoice_id());
        match pay(&invoice, tenant_id, 404_261).unwrap_err() {
            DomainError::InvariantViolation(msg) if msg.contains("cannot overpay invoice") => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn paying_to_total_marks_invoice_paid() {
        let tenant_id = test_tenant_id();
        let mut invoice = issued(tenant_id, test_invoice_id());
        assert_eq!(invoice.status(), InvoiceStatus::Open);

        for e in pay(&invoice, tenant_id, 4_260).unwrap() {
            invoice.apply(&e);
        }
        assert_eq!(invoice.outstanding_amount(), 400_000);
        assert_eq!(invoice.status(), InvoiceStatus::Open);

        for e in pay(&invoice, tenant_id, 400_000).unwrap() {
            invoice.apply(&e);
        }
        assert_eq!(invoice.status(), InvoiceStatus::Paid);

        let err = invoice
            .handle(&InvoiceCommand::VoidInvoice(VoidInvoice {
                tenant_id,
                invoice_id: invoice.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
