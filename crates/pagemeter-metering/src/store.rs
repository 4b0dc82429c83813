//! Append-only reading ledger
//!
//! One [`Reading`] is a timestamped snapshot of counter values for one
//! device. Rows are never mutated or deleted after insert; the only
//! write to an existing row is the dedup merge, which folds a retried
//! submission for the same `(device, timestamp)` into the original row
//! (last-write-wins per counter id).
//!
//! Writes to the same device serialize on a per-device mutex; writes to
//! different devices never contend beyond the map shard.

use crate::registry::CounterRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagemeter_common::{DeviceId, DeviceStatus, IngestError, MeterError, Oid, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// One stored reading row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub device: DeviceId,
    pub timestamp: DateTime<Utc>,
    /// Device status reported alongside the counters
    pub status: DeviceStatus,
    pub counters: HashMap<Oid, i64>,
    /// Global insertion sequence; breaks timestamp ties (higher wins)
    pub seq: u64,
    pub ingested_at: DateTime<Utc>,
}

/// What happened to an ingested payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New row appended
    Created,
    /// Merged into an existing row with the same (device, timestamp)
    Merged,
}

/// Append-only ledger of device readings
pub struct ReadingStore {
    registry: Arc<CounterRegistry>,
    /// Known devices; ingestion never creates devices itself
    devices: DashMap<DeviceId, ()>,
    readings: DashMap<DeviceId, Vec<Reading>>,
    /// Per-device write locks for the dedup read-modify-write
    locks: DashMap<DeviceId, Arc<Mutex<()>>>,
    seq: AtomicU64,
}

impl ReadingStore {
    pub fn new(registry: Arc<CounterRegistry>) -> Self {
        Self {
            registry,
            devices: DashMap::new(),
            readings: DashMap::new(),
            locks: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Make a device known to the ledger. Called by the sync path when a
    /// device is first mentioned; ingestion rejects unknown devices.
    pub fn register_device(&self, device: DeviceId) {
        self.devices.entry(device).or_insert(());
    }

    pub fn is_registered(&self, device: DeviceId) -> bool {
        self.devices.contains_key(&device)
    }

    /// Append a reading, or merge it into an existing row with the same
    /// timestamp.
    #[instrument(skip(self, counters), fields(device = %device, ts = %timestamp))]
    pub fn ingest(
        &self,
        device: DeviceId,
        timestamp: DateTime<Utc>,
        status: DeviceStatus,
        counters: HashMap<Oid, i64>,
    ) -> Result<IngestOutcome> {
        if counters.is_empty() {
            return Err(IngestError::EmptyCounters.into());
        }
        if !self.devices.contains_key(&device) {
            return Err(MeterError::UnknownDevice(device.to_string()));
        }

        // Unseen oids enter the catalog unconfigured.
        for oid in counters.keys() {
            self.registry.ensure(oid);
        }

        let lock = self
            .locks
            .entry(device)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let mut rows = self.readings.entry(device).or_default();
        if let Some(existing) = rows.iter_mut().find(|r| r.timestamp == timestamp) {
            // Retry-induced duplicate: last write wins per counter id.
            // Only counter values new to the row become live references;
            // an overwrite keeps the reference it already holds.
            for (oid, value) in counters {
                if existing.counters.insert(oid.clone(), value).is_none() {
                    self.registry.add_reference(&oid);
                }
            }
            existing.status = status;
            debug!("Merged duplicate reading");
            return Ok(IngestOutcome::Merged);
        }

        // Each stored counter value is one live reference.
        for oid in counters.keys() {
            self.registry.add_reference(oid);
        }
        rows.push(Reading {
            device,
            timestamp,
            status,
            counters,
            seq: self.seq.fetch_add(1, Ordering::AcqRel),
            ingested_at: Utc::now(),
        });
        Ok(IngestOutcome::Created)
    }

    /// Newest value of `oid` at or before `instant`. Ties on timestamp
    /// go to the most recently ingested row.
    pub fn latest_at_or_before(
        &self,
        device: DeviceId,
        oid: &Oid,
        instant: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, i64)> {
        self.select_latest(device, oid, |r| r.timestamp <= instant)
    }

    /// Newest value of `oid` with a timestamp in `[start, end)`.
    pub fn latest_within(
        &self,
        device: DeviceId,
        oid: &Oid,
        period: &pagemeter_common::BillingPeriod,
    ) -> Option<(DateTime<Utc>, i64)> {
        self.select_latest(device, oid, |r| period.contains(r.timestamp))
    }

    fn select_latest<F>(&self, device: DeviceId, oid: &Oid, keep: F) -> Option<(DateTime<Utc>, i64)>
    where
        F: Fn(&Reading) -> bool,
    {
        let rows = self.readings.get(&device)?;
        rows.iter()
            .filter(|r| keep(r) && r.counters.contains_key(oid))
            .max_by_key(|r| (r.timestamp, r.seq))
            .map(|r| (r.timestamp, r.counters[oid]))
    }

    /// Every oid observed for a device within a period, sorted for
    /// deterministic billing runs.
    pub fn oids_within(
        &self,
        device: DeviceId,
        period: &pagemeter_common::BillingPeriod,
    ) -> Vec<Oid> {
        let mut oids: Vec<Oid> = match self.readings.get(&device) {
            Some(rows) => rows
                .iter()
                .filter(|r| period.contains(r.timestamp))
                .flat_map(|r| r.counters.keys().cloned())
                .collect(),
            None => Vec::new(),
        };
        oids.sort();
        oids.dedup();
        oids
    }

    /// Number of stored rows for a device.
    pub fn reading_count(&self, device: DeviceId) -> usize {
        self.readings.get(&device).map(|r| r.len()).unwrap_or(0)
    }

    /// Snapshot of a device's rows, in insertion order (audit surface).
    pub fn readings_for(&self, device: DeviceId) -> Vec<Reading> {
        self.readings
            .get(&device)
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn counters(pairs: &[(&str, i64)]) -> HashMap<Oid, i64> {
        pairs.iter().map(|(o, v)| (Oid::from(*o), *v)).collect()
    }

    fn store_with_device() -> (ReadingStore, DeviceId) {
        let store = ReadingStore::new(Arc::new(CounterRegistry::new()));
        let device = DeviceId::new();
        store.register_device(device);
        (store, device)
    }

    #[test]
    fn test_empty_counters_rejected() {
        let (store, device) = store_with_device();
        let err = store
            .ingest(device, ts(2025, 1, 15, 10), DeviceStatus::Online, HashMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            MeterError::Ingest(IngestError::EmptyCounters)
        ));
    }

    #[test]
    fn test_unknown_device_rejected() {
        let store = ReadingStore::new(Arc::new(CounterRegistry::new()));
        let err = store
            .ingest(
                DeviceId::new(),
                ts(2025, 1, 15, 10),
                DeviceStatus::Online,
                counters(&[("total", 100)]),
            )
            .unwrap_err();
        assert!(matches!(err, MeterError::UnknownDevice(_)));
    }

    #[test]
    fn test_ingest_auto_creates_counter_types() {
        let registry = Arc::new(CounterRegistry::new());
        let store = ReadingStore::new(registry.clone());
        let device = DeviceId::new();
        store.register_device(device);

        store
            .ingest(
                device,
                ts(2025, 1, 15, 10),
                DeviceStatus::Online,
                counters(&[("1.3.6.1.2.1.43.10.2.1.4.1.1", 1000)]),
            )
            .unwrap();

        let ct = registry
            .get(&Oid::from("1.3.6.1.2.1.43.10.2.1.4.1.1"))
            .unwrap();
        assert!(!ct.active);
        assert_eq!(
            registry.reference_count(&Oid::from("1.3.6.1.2.1.43.10.2.1.4.1.1")),
            1
        );
    }

    #[test]
    fn test_duplicate_timestamp_merges_not_duplicates() {
        let (store, device) = store_with_device();
        let when = ts(2025, 1, 15, 10);

        let first = store
            .ingest(device, when, DeviceStatus::Online, counters(&[("total", 100)]))
            .unwrap();
        let second = store
            .ingest(
                device,
                when,
                DeviceStatus::Online,
                counters(&[("total", 120), ("mono", 80)]),
            )
            .unwrap();

        assert_eq!(first, IngestOutcome::Created);
        assert_eq!(second, IngestOutcome::Merged);
        assert_eq!(store.reading_count(device), 1);

        // last write wins per counter id
        let (_, v) = store
            .latest_at_or_before(device, &Oid::from("total"), when)
            .unwrap();
        assert_eq!(v, 120);
        let (_, v) = store
            .latest_at_or_before(device, &Oid::from("mono"), when)
            .unwrap();
        assert_eq!(v, 80);
    }

    #[test]
    fn test_merge_keeps_one_reference_per_stored_value() {
        let registry = Arc::new(CounterRegistry::new());
        let store = ReadingStore::new(registry.clone());
        let device = DeviceId::new();
        store.register_device(device);
        let when = ts(2025, 1, 15, 10);

        store
            .ingest(device, when, DeviceStatus::Online, counters(&[("total", 100)]))
            .unwrap();
        // retried submission overwrites "total" and adds "mono"
        store
            .ingest(
                device,
                when,
                DeviceStatus::Online,
                counters(&[("total", 120), ("mono", 80)]),
            )
            .unwrap();

        assert_eq!(registry.reference_count(&Oid::from("total")), 1);
        assert_eq!(registry.reference_count(&Oid::from("mono")), 1);

        // a distinct timestamp stores a second value for the oid
        store
            .ingest(device, ts(2025, 1, 15, 11), DeviceStatus::Online, counters(&[("total", 130)]))
            .unwrap();
        assert_eq!(registry.reference_count(&Oid::from("total")), 2);
    }

    #[test]
    fn test_idempotent_replay_yields_one_row() {
        let (store, device) = store_with_device();
        let when = ts(2025, 1, 15, 10);
        let payload = counters(&[("total", 100), ("mono", 60)]);

        store
            .ingest(device, when, DeviceStatus::Online, payload.clone())
            .unwrap();
        store
            .ingest(device, when, DeviceStatus::Online, payload)
            .unwrap();

        assert_eq!(store.reading_count(device), 1);
    }

    #[test]
    fn test_latest_within_half_open() {
        let (store, device) = store_with_device();
        let period =
            pagemeter_common::BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();

        store
            .ingest(device, ts(2025, 1, 25, 0), DeviceStatus::Online, counters(&[("total", 1500)]))
            .unwrap();
        store
            .ingest(device, ts(2025, 2, 10, 0), DeviceStatus::Online, counters(&[("total", 2100)]))
            .unwrap();
        // exactly at the end bound: belongs to the next period
        store
            .ingest(device, ts(2025, 3, 1, 0), DeviceStatus::Online, counters(&[("total", 2500)]))
            .unwrap();

        let (when, value) = store
            .latest_within(device, &Oid::from("total"), &period)
            .unwrap();
        assert_eq!(when, ts(2025, 2, 10, 0));
        assert_eq!(value, 2100);
    }

    #[test]
    fn test_latest_at_or_before_includes_instant() {
        let (store, device) = store_with_device();
        store
            .ingest(device, ts(2025, 2, 1, 0), DeviceStatus::Online, counters(&[("total", 999)]))
            .unwrap();

        let (when, value) = store
            .latest_at_or_before(device, &Oid::from("total"), ts(2025, 2, 1, 0))
            .unwrap();
        assert_eq!(when, ts(2025, 2, 1, 0));
        assert_eq!(value, 999);
    }

    #[test]
    fn test_oids_within_sorted_and_deduped() {
        let (store, device) = store_with_device();
        let period =
            pagemeter_common::BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        store
            .ingest(
                device,
                ts(2025, 2, 5, 0),
                DeviceStatus::Online,
                counters(&[("mono", 1), ("color", 2)]),
            )
            .unwrap();
        store
            .ingest(
                device,
                ts(2025, 2, 6, 0),
                DeviceStatus::Online,
                counters(&[("mono", 3), ("total", 4)]),
            )
            .unwrap();

        let oids = store.oids_within(device, &period);
        assert_eq!(
            oids,
            vec![Oid::from("color"), Oid::from("mono"), Oid::from("total")]
        );
    }
}
