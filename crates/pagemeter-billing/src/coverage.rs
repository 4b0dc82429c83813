//! Billed-coverage ledger
//!
//! Once a review is invoiced, the (device, counter, period) ranges it
//! consumed are marked here and an `unbilled_only` billing run will not
//! select them again. Cancelling a review releases its marks.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagemeter_common::{BillingPeriod, DeviceId, Oid, ReviewId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One billed range for a (device, counter) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSpan {
    pub period: BillingPeriod,
    pub review: ReviewId,
    pub marked_at: DateTime<Utc>,
}

/// Concurrent map of billed ranges keyed by (device, counter)
#[derive(Default)]
pub struct CoverageLedger {
    spans: DashMap<(DeviceId, Oid), Vec<CoverageSpan>>,
}

impl CoverageLedger {
    pub fn new() -> Self {
        Self {
            spans: DashMap::new(),
        }
    }

    /// Any billed range overlaps the candidate period.
    pub fn is_covered(&self, device: DeviceId, oid: &Oid, period: &BillingPeriod) -> bool {
        self.spans
            .get(&(device, oid.clone()))
            .map(|spans| spans.iter().any(|s| s.period.overlaps(period)))
            .unwrap_or(false)
    }

    /// Mark a range as billed by `review`.
    pub fn mark(&self, device: DeviceId, oid: &Oid, period: BillingPeriod, review: ReviewId) {
        debug!(device = %device, oid = %oid, %period, "Marking coverage as billed");
        self.spans
            .entry((device, oid.clone()))
            .or_default()
            .push(CoverageSpan {
                period,
                review,
                marked_at: Utc::now(),
            });
    }

    /// Release every mark owned by a review (cancellation path).
    pub fn release(&self, review: ReviewId) {
        for mut entry in self.spans.iter_mut() {
            entry.value_mut().retain(|s| s.review != review);
        }
    }

    /// Total marks currently held (test/ops surface).
    pub fn span_count(&self) -> usize {
        self.spans.iter().map(|e| e.value().len()).sum()
    }
}
