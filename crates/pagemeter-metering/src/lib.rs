//! # Pagemeter Metering
//!
//! Turns raw counter readings into billable deltas:
//! - [`CounterRegistry`]: get-or-create catalog of counter types keyed by OID
//! - [`ReadingStore`]: append-only ledger of timestamped device readings
//! - [`DeltaEngine`]: per-device, per-counter usage over a billing period
//!
//! The store and engine are deterministic: re-running a delta over the
//! same ledger state always yields the same result, which is what makes
//! the billing review's "recompute" operation safe.

pub mod delta;
pub mod registry;
pub mod store;

pub use delta::{CounterUsage, DeltaEngine, DeviceUsage};
pub use registry::CounterRegistry;
pub use store::{IngestOutcome, Reading, ReadingStore};
