//! Energy credit ledger (event-sourced).
//!
//! Pure domain logic only: the per-period generator and consumer steps, the
//! driver that chains them across periods, pool settlement, and the
//! aggregate that accepts posted records. No IO.

pub mod driver;
pub mod ledger;
pub mod policy;
pub mod pool;
pub mod record;
pub mod step;

pub use driver::{drive_installation, post_reading, validate_sequence};
pub use ledger::{
    EnergyLedger, LedgerCommand, LedgerEvent, LedgerOpened, OpenLedger, PeriodPosted, PostPeriod,
};
pub use policy::{CREDIT_EXPIRATION_MONTHS, LedgerPolicy, MissingPeriodPolicy};
pub use pool::{
    BalanceSheet, InstallationInput, PoolInput, PoolPeriodSummary, PoolSettlement, settle_pool,
};
pub use record::{LedgerRecord, PeriodReading};
pub use step::{ConsumerStep, GeneratorStep, consumer_step, generator_step};
