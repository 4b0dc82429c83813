//! Metered device (printer) entity
//!
//! Devices are a synchronized replica of what the remote collection
//! agents see. They are created on first sync mention, refreshed on
//! every sync, and soft-deactivated rather than deleted so historical
//! readings keep a valid owner.

use super::ids::{DeviceId, LocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last reported device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Maintenance,
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Error => "error",
            DeviceStatus::Maintenance => "maintenance",
            DeviceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One metered device, owned by exactly one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub location: LocationId,

    /// Network address the collector reaches the device at
    pub address: String,
    /// Hardware serial number, the preferred sync-match key
    pub serial: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub hostname: Option<String>,

    pub status: DeviceStatus,
    /// Soft-delete flag; readings of deactivated devices stay queryable
    pub active: bool,

    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Timestamp of the newest ingested reading
    pub last_reading: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(location: LocationId, address: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(),
            location,
            address: address.into(),
            serial: None,
            model: None,
            manufacturer: None,
            hostname: None,
            status: DeviceStatus::Unknown,
            active: true,
            first_seen: Utc::now(),
            last_seen: None,
            last_reading: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Display label: hostname, else model + address, else address.
    pub fn label(&self) -> String {
        if let Some(hostname) = &self.hostname {
            hostname.clone()
        } else if let Some(model) = &self.model {
            format!("{} ({})", model, self.address)
        } else {
            self.address.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_defaults() {
        let device = Device::new(LocationId::new(), "10.0.0.14");
        assert!(device.active);
        assert_eq!(device.status, DeviceStatus::Unknown);
        assert!(device.last_reading.is_none());
    }

    #[test]
    fn test_label_prefers_hostname() {
        let mut device = Device::new(LocationId::new(), "10.0.0.14").with_model("WF-6590");
        assert_eq!(device.label(), "WF-6590 (10.0.0.14)");
        device.hostname = Some("printer-01".into());
        assert_eq!(device.label(), "printer-01");
    }
}
