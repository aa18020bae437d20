use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

use raas_core::{Period, Quota, TenantId};
use raas_infra::event_store::InMemoryEventStore;
use raas_infra::export::{
    ledger_rows, write_invoices_csv, write_invoices_json, write_ledger_csv, write_ledger_json,
};
use raas_infra::ingest::{Portfolio, read_readings_file};
use raas_infra::{BillingRun, Settings, SettlementService};
use raas_ledger::PoolSettlement;

use crate::{InputArgs, OutputArgs, OutputFormat};

type Service = SettlementService<InMemoryEventStore>;

pub fn settle(settings: &Settings, input: &InputArgs, output: &OutputArgs) -> Result<()> {
    let (service, settlement) = load_and_settle(settings, input)?;
    let mut out = open_output(output)?;

    match output.format {
        OutputFormat::Csv => {
            let rows = ledger_rows(settlement.records_by_period(), service.registry())?;
            write_ledger_csv(&mut out, &rows)?;
        }
        OutputFormat::Json => {
            write_ledger_json(&mut out, &settlement.records_by_period(), service.registry())?;
        }
    }
    out.flush().context("failed to flush output")?;
    Ok(())
}

pub fn invoice(
    settings: &Settings,
    input: &InputArgs,
    period: &str,
    discount: Option<f64>,
    output: &OutputArgs,
) -> Result<()> {
    let period: Period = period
        .parse()
        .with_context(|| format!("invalid billing period '{period}'"))?;
    let discount = match discount {
        Some(percent) => Quota::from_percent(percent).context("invalid --discount")?,
        None => settings.discount()?,
    };

    let (service, settlement) = load_and_settle(settings, input)?;
    if !settlement.records.values().flatten().any(|r| r.period == period) {
        bail!("no readings settled for period {period}");
    }

    let invoices = service.issue_invoices(
        &settlement,
        &BillingRun {
            period,
            discount,
            due_days: settings.billing.due_days,
            issued_at: Utc::now(),
        },
    )?;

    let mut out = open_output(output)?;
    match output.format {
        OutputFormat::Csv => write_invoices_csv(&mut out, &invoices)?,
        OutputFormat::Json => write_invoices_json(&mut out, &invoices)?,
    }
    out.flush().context("failed to flush output")?;
    Ok(())
}

pub fn check(settings: &Settings, portfolio_path: &Path) -> Result<()> {
    let service = load_portfolio(settings, portfolio_path)?;
    let allocations = service.allocations()?;
    let generators = service.registry().generators().count();

    println!(
        "portfolio ok: {} installations ({} generators), {} allocations",
        service.registry().len(),
        generators,
        allocations.len()
    );
    Ok(())
}

fn load_portfolio(settings: &Settings, path: &Path) -> Result<Service> {
    let portfolio = Portfolio::from_file(path)
        .with_context(|| format!("failed to load portfolio {}", path.display()))?;

    let mut service = SettlementService::new(
        InMemoryEventStore::new(),
        TenantId::new(),
        settings.ledger_policy(),
    );
    service
        .load_portfolio(&portfolio)
        .with_context(|| format!("portfolio {} rejected", path.display()))?;
    Ok(service)
}

fn load_and_settle(settings: &Settings, input: &InputArgs) -> Result<(Service, PoolSettlement)> {
    let service = load_portfolio(settings, &input.portfolio)?;
    let readings = read_readings_file(&input.readings)
        .with_context(|| format!("failed to read {}", input.readings.display()))?;
    info!(rows = readings.row_count(), meters = readings.meter_codes().count(), "readings loaded");

    let settlement = service
        .settle(&readings)
        .with_context(|| format!("settlement of {} failed", input.readings.display()))?;
    Ok((service, settlement))
}

fn open_output(output: &OutputArgs) -> Result<Box<dyn Write>> {
    Ok(match &output.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}
