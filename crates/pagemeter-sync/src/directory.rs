//! Fleet directory
//!
//! Owns the synchronized replica of the remote fleet: locations, their
//! ingestion tokens, and devices. Everything here is written by the
//! sync path and read by billing through the [`DeviceCatalog`] seam.
//!
//! Token material is surfaced exactly once, at issue time; only blake3
//! digests are stored, indexed for O(1) resolution of a presented
//! secret to its location.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagemeter_billing::{CatalogDevice, DeviceCatalog};
use pagemeter_common::{
    hash_token, Device, DeviceId, DeviceStatus, Location, LocationId, MeterError, PartnerId,
    Result, SyncState, TokenRecord, TokenSecret,
};
use pagemeter_metering::ReadingStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// One device as reported by a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: String,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
}

/// What an upsert did with a device record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// In-memory registry of locations, tokens, and devices
pub struct FleetDirectory {
    store: Arc<ReadingStore>,
    locations: DashMap<LocationId, Location>,
    tokens: DashMap<LocationId, TokenRecord>,
    /// digest -> location, for presented-token lookup
    token_index: DashMap<String, LocationId>,
    devices: DashMap<DeviceId, Device>,
}

impl FleetDirectory {
    pub fn new(store: Arc<ReadingStore>) -> Self {
        Self {
            store,
            locations: DashMap::new(),
            tokens: DashMap::new(),
            token_index: DashMap::new(),
            devices: DashMap::new(),
        }
    }

    // ---- locations ----

    /// Create a location; (partner, name) must be unique.
    pub fn create_location(&self, partner: PartnerId, name: &str) -> Result<Location> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MeterError::Validation("location name cannot be empty".into()));
        }
        let duplicate = self
            .locations
            .iter()
            .any(|l| l.partner == partner && l.name == name);
        if duplicate {
            return Err(MeterError::Validation(format!(
                "location '{}' already exists for this partner",
                name
            )));
        }
        let location = Location::new(partner, name);
        info!(location = %location.id, name, "Created location");
        self.locations.insert(location.id, location.clone());
        Ok(location)
    }

    pub fn location(&self, id: LocationId) -> Option<Location> {
        self.locations.get(&id).map(|l| l.clone())
    }

    pub fn set_location_active(&self, id: LocationId, active: bool) -> Result<()> {
        let mut location = self
            .locations
            .get_mut(&id)
            .ok_or_else(|| MeterError::Referential(format!("unknown location {}", id)))?;
        location.active = active;
        Ok(())
    }

    /// Record the outcome of a sync batch against a location.
    pub(crate) fn note_sync(&self, id: LocationId, state: SyncState) {
        if let Some(mut location) = self.locations.get_mut(&id) {
            location.last_sync = Some(Utc::now());
            location.sync_state = state;
        }
    }

    // ---- tokens ----

    /// Issue (or rotate) the location's ingestion token. The previous
    /// token, if any, stops resolving immediately. The returned secret
    /// is the only copy that will ever exist.
    #[instrument(skip(self), fields(location = %location))]
    pub fn issue_token(&self, location: LocationId) -> Result<TokenSecret> {
        if !self.locations.contains_key(&location) {
            return Err(MeterError::Referential(format!(
                "unknown location {}",
                location
            )));
        }
        let (record, secret) = TokenRecord::issue();
        if let Some(previous) = self.tokens.insert(location, record.clone()) {
            self.token_index.remove(&previous.digest);
            info!("Rotated ingestion token");
        } else {
            info!("Issued ingestion token");
        }
        self.token_index.insert(record.digest, location);
        Ok(secret)
    }

    /// Deactivate the location's token without issuing a replacement.
    pub fn deactivate_token(&self, location: LocationId) -> Result<()> {
        let mut record = self.tokens.get_mut(&location).ok_or_else(|| {
            MeterError::Referential(format!("location {} has no token", location))
        })?;
        record.active = false;
        self.token_index.remove(&record.digest);
        Ok(())
    }

    /// Resolve presented token material to the location it authorizes.
    /// Updates the token's usage stats on success.
    pub fn resolve_token(&self, presented: &str) -> Result<LocationId> {
        let digest = hash_token(presented);
        let location_id = self
            .token_index
            .get(&digest)
            .map(|e| *e)
            .ok_or_else(|| MeterError::Unauthorized("unknown token".into()))?;

        let location_active = self
            .locations
            .get(&location_id)
            .map(|l| l.active)
            .unwrap_or(false);
        if !location_active {
            return Err(MeterError::Unauthorized("location is deactivated".into()));
        }

        let mut record = self
            .tokens
            .get_mut(&location_id)
            .ok_or_else(|| MeterError::Unauthorized("unknown token".into()))?;
        if !record.matches(presented) {
            return Err(MeterError::Unauthorized("token is deactivated".into()));
        }
        record.touch();
        Ok(location_id)
    }

    /// Usage stats for a location's current token.
    pub fn token_stats(&self, location: LocationId) -> Option<(u64, Option<DateTime<Utc>>)> {
        self.tokens
            .get(&location)
            .map(|t| (t.request_count, t.last_used))
    }

    // ---- devices ----

    /// Create or refresh a device from a sync record. Match priority
    /// within the location: serial number, then network address.
    pub fn upsert_device(
        &self,
        location: LocationId,
        record: &DeviceRecord,
    ) -> Result<(DeviceId, UpsertOutcome)> {
        if record.address.trim().is_empty() {
            return Err(MeterError::Validation("device address cannot be empty".into()));
        }

        if let Some(id) = self.find_device(location, record.serial.as_deref(), &record.address) {
            let mut device = self
                .devices
                .get_mut(&id)
                .ok_or_else(|| MeterError::Internal("device index out of sync".into()))?;
            device.address = record.address.clone();
            if record.serial.is_some() {
                device.serial = record.serial.clone();
            }
            if record.model.is_some() {
                device.model = record.model.clone();
            }
            if record.manufacturer.is_some() {
                device.manufacturer = record.manufacturer.clone();
            }
            if record.hostname.is_some() {
                device.hostname = record.hostname.clone();
            }
            device.status = record.status;
            device.last_seen = Some(Utc::now());
            device.active = true;
            return Ok((id, UpsertOutcome::Updated));
        }

        let mut device = Device::new(location, record.address.clone());
        device.serial = record.serial.clone();
        device.model = record.model.clone();
        device.manufacturer = record.manufacturer.clone();
        device.hostname = record.hostname.clone();
        device.status = record.status;
        device.last_seen = Some(Utc::now());
        let id = device.id;
        info!(device = %id, address = %device.address, "Created device from sync");
        self.devices.insert(id, device);
        self.store.register_device(id);
        Ok((id, UpsertOutcome::Created))
    }

    /// Find a device in a location by serial first, then address.
    pub fn find_device(
        &self,
        location: LocationId,
        serial: Option<&str>,
        address: &str,
    ) -> Option<DeviceId> {
        if let Some(serial) = serial {
            let by_serial = self.devices.iter().find(|d| {
                d.location == location && d.serial.as_deref() == Some(serial)
            });
            if let Some(device) = by_serial {
                return Some(device.id);
            }
        }
        self.devices
            .iter()
            .find(|d| d.location == location && d.address == address)
            .map(|d| d.id)
    }

    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.devices.get(&id).map(|d| d.clone())
    }

    /// Soft-deactivate; the device and its readings stay queryable.
    pub fn deactivate_device(&self, id: DeviceId) -> Result<()> {
        let mut device = self
            .devices
            .get_mut(&id)
            .ok_or_else(|| MeterError::Referential(format!("unknown device {}", id)))?;
        device.active = false;
        Ok(())
    }

    /// Refresh status and reading watermark after a successful ingest.
    pub(crate) fn note_reading(&self, id: DeviceId, status: DeviceStatus, at: DateTime<Utc>) {
        if let Some(mut device) = self.devices.get_mut(&id) {
            device.status = status;
            device.last_seen = Some(Utc::now());
            if device.last_reading.map(|prev| at > prev).unwrap_or(true) {
                device.last_reading = Some(at);
            }
        }
    }

    pub fn devices_in_location(&self, location: LocationId) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| d.location == location)
            .map(|d| d.clone())
            .collect()
    }
}

impl DeviceCatalog for FleetDirectory {
    fn devices_for_partner(&self, partner: PartnerId) -> Vec<CatalogDevice> {
        let mut out = Vec::new();
        for location in self.locations.iter().filter(|l| l.partner == partner) {
            for device in self.devices.iter().filter(|d| d.location == location.id) {
                out.push(CatalogDevice {
                    id: device.id,
                    label: device.label(),
                    location: location.id,
                    location_name: location.name.clone(),
                });
            }
        }
        out
    }
}
