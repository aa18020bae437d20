//! CSV and JSON output of posted ledger records and issued invoices.
//!
//! CSV energy columns are kWh with three decimals, printed from the exact
//! Wh value; columns that do not apply to an installation kind are empty.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use raas_core::{Energy, Period};
use raas_installations::{InstallationId, InstallationKind};
use raas_invoicing::InvoiceStatus;
use raas_ledger::LedgerRecord;

use crate::service::{IssuedInvoice, Registry};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("no meter code registered for installation {0}")]
    UnknownInstallation(InstallationId),
}

/// One row of the ledger CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub installation: InstallationId,
    pub meter_code: String,
    pub kind: InstallationKind,
    pub period: Period,
    pub consumption_kwh: String,
    pub generation_kwh: Option<String>,
    pub transferred_kwh: Option<String>,
    pub received_kwh: Option<String>,
    pub compensation_kwh: String,
    pub previous_balance_kwh: String,
    pub current_balance_kwh: String,
    pub expiring_balance_kwh: String,
    pub expiring_period: Option<Period>,
}

impl LedgerRow {
    pub fn new(meter_code: impl Into<String>, record: &LedgerRecord) -> Self {
        Self {
            installation: record.installation_id,
            meter_code: meter_code.into(),
            kind: record.kind,
            period: record.period,
            consumption_kwh: kwh(record.consumption),
            generation_kwh: record.generation.map(kwh),
            transferred_kwh: record.transferred.map(kwh),
            received_kwh: record.received.map(kwh),
            compensation_kwh: kwh(record.compensation),
            previous_balance_kwh: kwh(record.previous_balance),
            current_balance_kwh: kwh(record.current_balance),
            expiring_balance_kwh: kwh(record.expiring_balance),
            expiring_period: record.expiring_period,
        }
    }
}

/// JSON form: the record itself plus its meter code.
#[derive(Debug, Clone, Serialize)]
struct LedgerEntry<'a> {
    meter_code: &'a str,
    #[serde(flatten)]
    record: &'a LedgerRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceRow {
    pub invoice: String,
    pub meter_code: String,
    pub period: Period,
    pub compensated_kwh: String,
    pub full_amount: String,
    pub discount_amount: String,
    pub total_amount: String,
    pub due_date: Option<String>,
    pub status: InvoiceStatus,
}

impl InvoiceRow {
    pub fn new(issued: &IssuedInvoice) -> Self {
        let invoice = &issued.invoice;
        let pricing = invoice.pricing().unwrap_or_default();
        Self {
            invoice: invoice.id_typed().to_string(),
            meter_code: issued.meter_code.clone(),
            period: issued.record.period,
            compensated_kwh: kwh(invoice.compensated()),
            full_amount: money(pricing.full_amount),
            discount_amount: money(pricing.discount_amount),
            total_amount: money(pricing.total_amount),
            due_date: invoice.due_date().map(|d| d.date_naive().to_string()),
            status: invoice.status(),
        }
    }
}

/// Ledger rows in period order, then installation.
pub fn ledger_rows<'a>(
    records: impl IntoIterator<Item = &'a LedgerRecord>,
    registry: &Registry,
) -> Result<Vec<LedgerRow>, ExportError> {
    let mut rows = records
        .into_iter()
        .map(|record| {
            registry
                .meter_code(record.installation_id)
                .map(|code| LedgerRow::new(code, record))
                .ok_or(ExportError::UnknownInstallation(record.installation_id))
        })
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| (a.period, &a.meter_code).cmp(&(b.period, &b.meter_code)));
    Ok(rows)
}

pub fn write_ledger_csv<W: Write>(writer: W, rows: &[LedgerRow]) -> Result<(), ExportError> {
    write_csv(writer, rows)
}

pub fn write_ledger_json<W: Write>(
    writer: W,
    records: &[&LedgerRecord],
    registry: &Registry,
) -> Result<(), ExportError> {
    let entries = records
        .iter()
        .map(|record| {
            registry
                .meter_code(record.installation_id)
                .map(|meter_code| LedgerEntry { meter_code, record })
                .ok_or(ExportError::UnknownInstallation(record.installation_id))
        })
        .collect::<Result<Vec<_>, _>>()?;
    write_json(writer, &entries)
}

pub fn write_invoices_csv<W: Write>(writer: W, invoices: &[IssuedInvoice]) -> Result<(), ExportError> {
    let rows: Vec<InvoiceRow> = invoices.iter().map(InvoiceRow::new).collect();
    write_csv(writer, &rows)
}

pub fn write_invoices_json<W: Write>(writer: W, invoices: &[IssuedInvoice]) -> Result<(), ExportError> {
    let rows: Vec<InvoiceRow> = invoices.iter().map(InvoiceRow::new).collect();
    write_json(writer, &rows)
}

fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    Ok(())
}

fn kwh(energy: Energy) -> String {
    let wh = energy.as_wh();
    format!("{}.{:03}", wh / 1_000, wh % 1_000)
}

fn money(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
