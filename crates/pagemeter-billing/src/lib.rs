//! # Pagemeter Billing
//!
//! Converts computed counter deltas into finalized invoice lines through
//! an editable review workflow:
//!
//! - [`ReviewBook`]: draft → confirmed → invoiced state machine with
//!   per-field audit trail and optimistic concurrency
//! - [`PriceBook`]: per-partner unit price overrides
//! - [`CoverageLedger`]: billed (device, counter, period) ranges that a
//!   later run must not re-select
//! - [`build_invoice_lines`]: pure review → invoice-line transition

pub mod catalog;
pub mod coverage;
pub mod invoice;
pub mod prices;
pub mod review;

pub use catalog::{CatalogDevice, DeviceCatalog};
pub use coverage::CoverageLedger;
pub use invoice::{build_invoice_lines, InvoiceLine, InvoiceTarget};
pub use prices::PriceBook;
pub use review::{
    BillingReview, CounterEdit, GenerateOptions, ReviewBook, ReviewCounter, ReviewLine, ReviewRef,
    ReviewState,
};
