//! Batch sync service
//!
//! The entry point remote collectors talk to. Every call authenticates
//! with a location-scoped token, then processes its batch one record at
//! a time: a bad record gets an error outcome and the batch keeps
//! going. Only authentication failure rejects a whole call.

use crate::consumables::{ConsumableBay, ConsumableRecord};
use crate::directory::{DeviceRecord, FleetDirectory, UpsertOutcome};
use chrono::{DateTime, Utc};
use pagemeter_common::{DeviceId, DeviceStatus, IngestError, LocationId, Oid, Result, SyncState};
use pagemeter_metering::{IngestOutcome, ReadingStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One counter snapshot as submitted by a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRecord {
    /// Serial number or network address of the reporting device
    pub device_ref: String,
    /// RFC 3339 timestamp of the snapshot
    pub timestamp: String,
    #[serde(default)]
    pub status: DeviceStatus,
    pub counters: HashMap<String, i64>,
}

/// What happened to one record of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RecordOutcome {
    Created,
    Updated,
    Merged,
    Error { reason: String },
}

/// Per-record results for one sync call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// (record reference, outcome), in submission order
    pub records: Vec<(String, RecordOutcome)>,
}

impl SyncReport {
    fn push(&mut self, reference: impl Into<String>, outcome: RecordOutcome) {
        self.records.push((reference.into(), outcome));
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Error { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    fn sync_state(&self) -> SyncState {
        if self.is_clean() {
            SyncState::Success
        } else if self.error_count() < self.records.len() {
            SyncState::Partial
        } else {
            SyncState::Error
        }
    }
}

/// Collector-facing sync API
pub struct SyncService {
    directory: Arc<FleetDirectory>,
    store: Arc<ReadingStore>,
    consumables: Arc<ConsumableBay>,
}

impl SyncService {
    pub fn new(
        directory: Arc<FleetDirectory>,
        store: Arc<ReadingStore>,
        consumables: Arc<ConsumableBay>,
    ) -> Self {
        Self {
            directory,
            store,
            consumables,
        }
    }

    /// Upsert the devices a collector currently sees.
    #[instrument(skip(self, token, records), fields(count = records.len()))]
    pub async fn sync_devices(&self, token: &str, records: Vec<DeviceRecord>) -> Result<SyncReport> {
        let location = self.directory.resolve_token(token)?;

        let mut report = SyncReport { records: Vec::new() };
        for record in &records {
            let outcome = match self.directory.upsert_device(location, record) {
                Ok((_, UpsertOutcome::Created)) => RecordOutcome::Created,
                Ok((_, UpsertOutcome::Updated)) => RecordOutcome::Updated,
                Err(err) => {
                    warn!(address = %record.address, %err, "Device record rejected");
                    RecordOutcome::Error {
                        reason: err.to_string(),
                    }
                }
            };
            report.push(record.address.clone(), outcome);
        }

        self.finish(location, &report, "device sync");
        Ok(report)
    }

    /// Ingest a batch of counter readings.
    #[instrument(skip(self, token, records), fields(count = records.len()))]
    pub async fn sync_readings(
        &self,
        token: &str,
        records: Vec<ReadingRecord>,
    ) -> Result<SyncReport> {
        let location = self.directory.resolve_token(token)?;

        let mut report = SyncReport { records: Vec::new() };
        for record in records {
            let reference = record.device_ref.clone();
            let outcome = match self.ingest_one(location, record) {
                Ok(IngestOutcome::Created) => RecordOutcome::Created,
                Ok(IngestOutcome::Merged) => RecordOutcome::Merged,
                Err(err) => {
                    warn!(device_ref = %reference, %err, "Reading record rejected");
                    RecordOutcome::Error {
                        reason: err.to_string(),
                    }
                }
            };
            report.push(reference, outcome);
        }

        self.finish(location, &report, "reading sync");
        Ok(report)
    }

    fn ingest_one(&self, location: LocationId, record: ReadingRecord) -> Result<IngestOutcome> {
        let device = self.resolve_device(location, &record.device_ref)?;
        let timestamp = parse_timestamp(&record.timestamp)?;
        let counters: HashMap<Oid, i64> = record
            .counters
            .into_iter()
            .map(|(oid, value)| (Oid::from(oid), value))
            .collect();

        let outcome = self.store.ingest(device, timestamp, record.status, counters)?;
        self.directory.note_reading(device, record.status, timestamp);
        Ok(outcome)
    }

    /// Upsert supply levels for the devices of a batch.
    #[instrument(skip(self, token, records), fields(count = records.len()))]
    pub async fn sync_consumables(
        &self,
        token: &str,
        records: Vec<ConsumableRecord>,
    ) -> Result<SyncReport> {
        let location = self.directory.resolve_token(token)?;

        let mut report = SyncReport { records: Vec::new() };
        for record in &records {
            let reference = format!("{}/{}", record.device_ref, record.supply);
            let outcome = match self.resolve_device(location, &record.device_ref) {
                Ok(device) => {
                    if self.consumables.upsert(device, record) {
                        RecordOutcome::Created
                    } else {
                        RecordOutcome::Updated
                    }
                }
                Err(err) => RecordOutcome::Error {
                    reason: err.to_string(),
                },
            };
            report.push(reference, outcome);
        }

        self.finish(location, &report, "consumable sync");
        Ok(report)
    }

    fn resolve_device(&self, location: LocationId, device_ref: &str) -> Result<DeviceId> {
        self.directory
            .find_device(location, Some(device_ref), device_ref)
            .ok_or_else(|| IngestError::UnknownDeviceRef(device_ref.to_string()).into())
    }

    fn finish(&self, location: LocationId, report: &SyncReport, what: &str) {
        let state = report.sync_state();
        self.directory.note_sync(location, state);
        info!(
            location = %location,
            records = report.records.len(),
            errors = report.error_count(),
            "Finished {}",
            what
        );
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| IngestError::InvalidTimestamp(raw.to_string()).into())
}
