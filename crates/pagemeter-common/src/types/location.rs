//! Location entity
//!
//! A location groups devices under one billing partner and owns the
//! ingestion credential for its remote collector.

use super::ids::{LocationId, PartnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent sync from this location's collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Never,
    Success,
    Partial,
    Error,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Never
    }
}

/// Physical site holding devices, owned by one partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub partner: PartnerId,
    /// Unique per partner
    pub name: String,
    pub active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_state: SyncState,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(partner: PartnerId, name: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            partner,
            name: name.into(),
            active: true,
            last_sync: None,
            sync_state: SyncState::Never,
            created_at: Utc::now(),
        }
    }
}
