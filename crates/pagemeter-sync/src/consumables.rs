//! Consumable (supply) levels
//!
//! Toner, drums, and maintenance kits reported by collectors alongside
//! counter readings. Levels are informational; nothing here feeds the
//! billing path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagemeter_common::DeviceId;
use serde::{Deserialize, Serialize};

/// One supply slot as reported by a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumableRecord {
    /// Serial number or network address of the device
    pub device_ref: String,
    /// Supply slot name as the device reports it, e.g. "Black Toner"
    pub supply: String,
    /// Fill level 0-100; `None` when the device cannot report one
    #[serde(default)]
    pub level_percent: Option<u8>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Status derived from the fill level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyStatus {
    Ok,
    Low,
    Critical,
    Empty,
    Unknown,
}

impl SupplyStatus {
    pub fn from_level(level: Option<u8>) -> Self {
        match level {
            None => SupplyStatus::Unknown,
            Some(0) => SupplyStatus::Empty,
            Some(l) if l <= 10 => SupplyStatus::Critical,
            Some(l) if l <= 25 => SupplyStatus::Low,
            Some(_) => SupplyStatus::Ok,
        }
    }
}

/// Stored supply state for one (device, slot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumable {
    pub supply: String,
    pub color: Option<String>,
    pub level_percent: Option<u8>,
    pub status: SupplyStatus,
    pub updated_at: DateTime<Utc>,
}

/// Current supply levels across the fleet, keyed by (device, slot name)
#[derive(Default)]
pub struct ConsumableBay {
    slots: DashMap<(DeviceId, String), Consumable>,
}

impl ConsumableBay {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Upsert one slot; returns true when the slot was first seen.
    pub fn upsert(&self, device: DeviceId, record: &ConsumableRecord) -> bool {
        let key = (device, record.supply.clone());
        let created = !self.slots.contains_key(&key);
        self.slots.insert(
            key,
            Consumable {
                supply: record.supply.clone(),
                color: record.color.clone(),
                level_percent: record.level_percent,
                status: SupplyStatus::from_level(record.level_percent),
                updated_at: Utc::now(),
            },
        );
        created
    }

    /// All slots of a device, sorted by slot name.
    pub fn for_device(&self, device: DeviceId) -> Vec<Consumable> {
        let mut slots: Vec<Consumable> = self
            .slots
            .iter()
            .filter(|e| e.key().0 == device)
            .map(|e| e.value().clone())
            .collect();
        slots.sort_by(|a, b| a.supply.cmp(&b.supply));
        slots
    }

    /// Slots at or below the low watermark, fleet-wide.
    pub fn needing_attention(&self) -> Vec<(DeviceId, Consumable)> {
        self.slots
            .iter()
            .filter(|e| {
                matches!(
                    e.value().status,
                    SupplyStatus::Low | SupplyStatus::Critical | SupplyStatus::Empty
                )
            })
            .map(|e| (e.key().0, e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        assert_eq!(SupplyStatus::from_level(None), SupplyStatus::Unknown);
        assert_eq!(SupplyStatus::from_level(Some(0)), SupplyStatus::Empty);
        assert_eq!(SupplyStatus::from_level(Some(10)), SupplyStatus::Critical);
        assert_eq!(SupplyStatus::from_level(Some(25)), SupplyStatus::Low);
        assert_eq!(SupplyStatus::from_level(Some(26)), SupplyStatus::Ok);
        assert_eq!(SupplyStatus::from_level(Some(100)), SupplyStatus::Ok);
    }

    fn record(supply: &str, level: Option<u8>) -> ConsumableRecord {
        ConsumableRecord {
            device_ref: "SN-001".into(),
            supply: supply.into(),
            level_percent: level,
            color: None,
        }
    }

    #[test]
    fn test_upsert_replaces_slot() {
        let bay = ConsumableBay::new();
        let device = DeviceId::new();

        assert!(bay.upsert(device, &record("Black Toner", Some(80))));
        assert!(!bay.upsert(device, &record("Black Toner", Some(5))));

        let slots = bay.for_device(device);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].level_percent, Some(5));
        assert_eq!(slots[0].status, SupplyStatus::Critical);
    }

    #[test]
    fn test_needing_attention_filters_ok_slots() {
        let bay = ConsumableBay::new();
        let device = DeviceId::new();
        bay.upsert(device, &record("Black Toner", Some(80)));
        bay.upsert(device, &record("Cyan Toner", Some(12)));

        let low = bay.needing_attention();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].1.supply, "Cyan Toner");
    }
}
