//! Ingestion of the two input files: the portfolio (TOML) and the monthly
//! meter readings (CSV).

pub mod portfolio;
pub mod readings;

use thiserror::Error;

pub use portfolio::{
    AllocationEntry, DistributorEntry, InstallationEntry, OpeningBalanceEntry, Portfolio,
};
pub use readings::{ReadingSet, read_readings, read_readings_file};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse portfolio: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("readings row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error("readings row {row}: {message}")]
    Row { row: usize, message: String },

    #[error("invalid portfolio: {0}")]
    Portfolio(String),
}
