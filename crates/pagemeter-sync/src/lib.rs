//! # Pagemeter Sync
//!
//! The ingestion boundary between remote collection agents and the
//! metering core:
//!
//! - [`FleetDirectory`]: locations, ingestion tokens, and the device
//!   replica; implements the billing side's device catalog
//! - [`SyncService`]: token-authenticated batch endpoints for devices,
//!   readings, and consumables with per-record outcomes
//! - [`CommandDispatcher`]: routes signed billing command envelopes
//!   onto the review workflow

pub mod command;
pub mod consumables;
pub mod directory;
pub mod service;

pub use command::{CommandDispatcher, CommandEnvelope};
pub use consumables::{Consumable, ConsumableBay, ConsumableRecord, SupplyStatus};
pub use directory::{DeviceRecord, FleetDirectory, UpsertOutcome};
pub use service::{ReadingRecord, RecordOutcome, SyncReport, SyncService};
