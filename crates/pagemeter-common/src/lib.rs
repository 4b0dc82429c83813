//! # Pagemeter Common
//!
//! Shared types and errors for the Pagemeter usage-billing engine.
//!
//! ## Core Types
//!
//! - [`Oid`]: opaque counter identifier as reported by devices
//! - [`BillingPeriod`]: half-open `[from, to)` billing window
//! - [`Device`]/[`Location`]: the metered fleet topology
//! - [`TokenRecord`]: location-scoped ingestion credential (hash only)
//! - [`CounterType`]: billing metadata attached to an [`Oid`]

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{IngestError, MeterError, Result};
pub use types::{
    counter::{CounterType, CounterTypeUpdate},
    device::{Device, DeviceStatus},
    ids::{DeviceId, LocationId, Oid, PartnerId, ProductId, ReviewId},
    location::{Location, SyncState},
    period::BillingPeriod,
    token::{hash_token, TokenRecord, TokenSecret},
};

/// Pagemeter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Length in bytes of the random material behind a token secret
pub const TOKEN_SECRET_BYTES: usize = 32;
