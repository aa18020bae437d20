//! raas - Roof-as-a-Service energy credit ledger
//!
//! Settles a portfolio's monthly meter readings into per-installation
//! ledgers and issues the operator's invoices.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use raas_infra::Settings;

mod commands;

/// raas - Roof-as-a-Service energy credit ledger
#[derive(Parser, Debug)]
#[command(name = "raas")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a settings file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. info, raas_infra=debug); overrides the settings file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Settle all readings and write the resulting ledger
    Settle {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Settle, then issue invoices for one period
    Invoice {
        #[command(flatten)]
        input: InputArgs,

        /// Billing period (MM/YYYY)
        #[arg(long)]
        period: String,

        /// Operator discount on the distributor tariff, in percent
        #[arg(long)]
        discount: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Validate a portfolio without settling
    Check {
        /// Portfolio file (TOML)
        #[arg(short, long)]
        portfolio: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct InputArgs {
    /// Portfolio file (TOML)
    #[arg(short, long)]
    portfolio: PathBuf,

    /// Meter readings file (CSV)
    #[arg(short, long)]
    readings: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(filter) = &cli.log_level {
        settings.logging.filter.clone_from(filter);
    }
    raas_observability::init(&settings.logging);

    match cli.command {
        Commands::Settle { input, output } => commands::settle(&settings, &input, &output),
        Commands::Invoice {
            input,
            period,
            discount,
            output,
        } => commands::invoice(&settings, &input, &period, discount, &output),
        Commands::Check { portfolio } => commands::check(&settings, &portfolio),
    }
}
