//! Delta computation
//!
//! Computes the billable usage for one device, one counter, one billing
//! period from nearest-neighbor boundary lookups over the reading
//! ledger:
//!
//! - closing value: newest reading inside `[from, to)`; if none, the
//!   pair saw zero activity and produces no usage at all
//! - opening value: newest reading at or before `from`; if none, the
//!   counter starts from zero (first-ever billing period)
//!
//! A closing value below the opening value means the device counter
//! reset or rolled over. The raw negative delta is kept and flagged
//! (`anomaly`) rather than clamped or wrap-corrected: guessing a
//! modulus without knowing the device's counter width would silently
//! fabricate pages, so a human settles it during review.

use crate::store::ReadingStore;
use chrono::{DateTime, Utc};
use pagemeter_common::{BillingPeriod, DeviceId, Oid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Computed usage for one (device, counter, period)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterUsage {
    pub oid: Oid,
    /// Opening counter value (0 when no prior reading exists)
    pub counter_start: i64,
    /// Timestamp of the opening reading, if one existed
    pub start_at: Option<DateTime<Utc>>,
    /// Closing counter value
    pub counter_end: i64,
    pub end_at: DateTime<Utc>,
    /// Raw difference; negative when the counter reset mid-period
    pub delta: i64,
    /// Reset/rollover marker; blocks review confirmation until a human
    /// overrides the values or excludes the line
    pub anomaly: bool,
}

/// Usage for every counter a device reported in the period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub device: DeviceId,
    pub counters: Vec<CounterUsage>,
}

/// Deterministic per-period usage computation over a [`ReadingStore`]
pub struct DeltaEngine {
    store: Arc<ReadingStore>,
}

impl DeltaEngine {
    pub fn new(store: Arc<ReadingStore>) -> Self {
        Self { store }
    }

    /// Usage for a single (device, counter) pair. `None` means the pair
    /// produced no reading in the period and must not appear in the
    /// billing run at all.
    pub fn usage_for_counter(
        &self,
        device: DeviceId,
        oid: &Oid,
        period: &BillingPeriod,
    ) -> Option<CounterUsage> {
        let (end_at, counter_end) = self.store.latest_within(device, oid, period)?;

        let (start_at, counter_start) =
            match self.store.latest_at_or_before(device, oid, period.from) {
                Some((ts, value)) => (Some(ts), value),
                None => (None, 0),
            };

        let delta = counter_end - counter_start;
        let anomaly = counter_end < counter_start;
        if anomaly {
            warn!(
                device = %device, oid = %oid,
                start = counter_start, end = counter_end,
                "Counter went backwards; flagging for review"
            );
        } else {
            debug!(
                device = %device, oid = %oid,
                start = counter_start, end = counter_end, delta,
                "Computed counter usage"
            );
        }

        Some(CounterUsage {
            oid: oid.clone(),
            counter_start,
            start_at,
            counter_end,
            end_at,
            delta,
            anomaly,
        })
    }

    /// Usage for every counter the device reported within the period,
    /// in oid order. Devices with no readings in the period yield an
    /// empty list.
    pub fn usage_for_device(&self, device: DeviceId, period: &BillingPeriod) -> DeviceUsage {
        let counters = self
            .store
            .oids_within(device, period)
            .iter()
            .filter_map(|oid| self.usage_for_counter(device, oid, period))
            .collect();
        DeviceUsage { device, counters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CounterRegistry;
    use chrono::TimeZone;
    use pagemeter_common::DeviceStatus;
    use std::collections::HashMap;

    fn ts(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ReadingStore>, DeltaEngine, DeviceId) {
        let store = Arc::new(ReadingStore::new(Arc::new(CounterRegistry::new())));
        let device = DeviceId::new();
        store.register_device(device);
        let engine = DeltaEngine::new(store.clone());
        (store, engine, device)
    }

    fn feed(store: &ReadingStore, device: DeviceId, when: DateTime<Utc>, value: i64) {
        let mut counters = HashMap::new();
        counters.insert(Oid::from("total"), value);
        store
            .ingest(device, when, DeviceStatus::Online, counters)
            .unwrap();
    }

    #[test]
    fn test_monotonic_happy_path() {
        // readings: (01-15,1000) (01-20,1200) (01-25,1500) (02-05,1883) (02-10,2100)
        // period [02-01, 02-28) => start=1500, end=2100, delta=600
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 1, 15), 1000);
        feed(&store, device, ts(2025, 1, 20), 1200);
        feed(&store, device, ts(2025, 1, 25), 1500);
        feed(&store, device, ts(2025, 2, 5), 1883);
        feed(&store, device, ts(2025, 2, 10), 2100);

        let period = BillingPeriod::from_dates((2025, 2, 1), (2025, 2, 28)).unwrap();
        let usage = engine
            .usage_for_counter(device, &Oid::from("total"), &period)
            .unwrap();

        assert_eq!(usage.counter_start, 1500);
        assert_eq!(usage.counter_end, 2100);
        assert_eq!(usage.delta, 600);
        assert!(!usage.anomaly);
        assert_eq!(usage.start_at, Some(ts(2025, 1, 25)));
        assert_eq!(usage.end_at, ts(2025, 2, 10));
    }

    #[test]
    fn test_no_prior_reading_starts_from_zero() {
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 2, 10), 420);

        let period = BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        let usage = engine
            .usage_for_counter(device, &Oid::from("total"), &period)
            .unwrap();

        assert_eq!(usage.counter_start, 0);
        assert!(usage.start_at.is_none());
        assert_eq!(usage.delta, 420);
        assert!(!usage.anomaly);
    }

    #[test]
    fn test_no_reading_in_period_excludes_pair() {
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 1, 15), 1000);

        let period = BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        assert!(engine
            .usage_for_counter(device, &Oid::from("total"), &period)
            .is_none());
        assert!(engine.usage_for_device(device, &period).counters.is_empty());
    }

    #[test]
    fn test_counter_reset_flags_anomaly_with_raw_delta() {
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 1, 25), 9000);
        feed(&store, device, ts(2025, 2, 10), 150); // device was swapped or reset

        let period = BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        let usage = engine
            .usage_for_counter(device, &Oid::from("total"), &period)
            .unwrap();

        assert!(usage.anomaly);
        assert_eq!(usage.delta, -8850); // raw, never clamped
    }

    #[test]
    fn test_adjacent_periods_sum_without_gap_or_double_count() {
        // boundary reading lands strictly inside P1, so it serves as
        // both P1's closing and P2's opening value
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 1, 5), 100);
        feed(&store, device, ts(2025, 1, 31), 400); // inside P1, at-or-before P2.from
        feed(&store, device, ts(2025, 2, 20), 900);

        let p1 = BillingPeriod::from_dates((2025, 1, 1), (2025, 2, 1)).unwrap();
        let p2 = BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        let whole = BillingPeriod::from_dates((2025, 1, 1), (2025, 3, 1)).unwrap();

        let oid = Oid::from("total");
        let d1 = engine.usage_for_counter(device, &oid, &p1).unwrap().delta;
        let d2 = engine.usage_for_counter(device, &oid, &p2).unwrap().delta;
        let dw = engine.usage_for_counter(device, &oid, &whole).unwrap().delta;

        assert_eq!(d1 + d2, dw);
        assert_eq!(dw, 900);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let (store, engine, device) = setup();
        feed(&store, device, ts(2025, 1, 25), 1500);
        feed(&store, device, ts(2025, 2, 10), 2100);

        let period = BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap();
        let oid = Oid::from("total");
        let first = engine.usage_for_counter(device, &oid, &period).unwrap();
        let second = engine.usage_for_counter(device, &oid, &period).unwrap();

        assert_eq!(first.counter_start, second.counter_start);
        assert_eq!(first.counter_end, second.counter_end);
        assert_eq!(first.delta, second.delta);
    }
}
