//! Invoicing domain module (event-sourced).
//!
//! Prices the energy a consumer had compensated in a period and tracks the
//! operator's invoice for it. Deterministic domain logic only (no IO).

pub mod invoice;
pub mod pricing;

pub use invoice::{
    Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceIssued, InvoiceStatus,
    InvoiceVoided, IssueInvoice, PaymentRegistered, RegisterPayment, VoidInvoice,
};
pub use pricing::{Pricing, price_compensation};
