//! Billing review workflow
//!
//! A [`BillingReview`] is an editable draft built from delta-engine
//! output for one partner and period. Reviewers adjust counter values,
//! prices, and line inclusion, then confirm and invoice. Every counter
//! keeps the originally computed values in shadow fields, and every
//! edit sets a per-field touched marker so a recompute can refresh
//! stale computed data without clobbering an intentional override.
//!
//! State machine:
//!
//! ```text
//! draft ──confirm──▶ confirmed ──invoice──▶ invoiced (terminal)
//!   │                    │
//!   └──────cancel────────┴──▶ cancelled (terminal)
//! ```
//!
//! Mutations are optimistic: every operation takes a [`ReviewRef`]
//! carrying the version the caller last saw. A stale ref fails with
//! `ConcurrentModification` and the caller must reload.

use crate::catalog::DeviceCatalog;
use crate::coverage::CoverageLedger;
use crate::invoice::{build_invoice_lines, InvoiceLine};
use crate::prices::PriceBook;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pagemeter_common::{
    BillingPeriod, DeviceId, MeterError, Oid, PartnerId, Result, ReviewId,
};
use pagemeter_metering::{CounterRegistry, CounterUsage, DeltaEngine, ReadingStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

/// Review lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Draft,
    Confirmed,
    Invoiced,
    Cancelled,
}

impl ReviewState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewState::Invoiced | ReviewState::Cancelled)
    }
}

/// Per-field manual-override markers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedFields {
    pub start: bool,
    pub end: bool,
    pub price: bool,
}

/// One counter row on a review line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCounter {
    pub oid: Oid,
    pub name: String,

    // Originally computed values: the audit trail. Never edited.
    pub computed_start: i64,
    pub computed_end: i64,
    pub computed_price: Decimal,
    pub computed_anomaly: bool,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,

    // Effective values: editable while the review is a draft.
    pub counter_start: i64,
    pub counter_end: i64,
    pub unit_price: Decimal,
    pub touched: TouchedFields,
}

impl ReviewCounter {
    fn from_usage(usage: &CounterUsage, name: String, unit_price: Decimal) -> Self {
        Self {
            oid: usage.oid.clone(),
            name,
            computed_start: usage.counter_start,
            computed_end: usage.counter_end,
            computed_price: unit_price,
            computed_anomaly: usage.anomaly,
            start_at: usage.start_at,
            end_at: Some(usage.end_at),
            counter_start: usage.counter_start,
            counter_end: usage.counter_end,
            unit_price,
            touched: TouchedFields::default(),
        }
    }

    /// Refresh computed values from a fresh delta run, preserving every
    /// field the reviewer touched.
    fn absorb(&mut self, usage: &CounterUsage, unit_price: Decimal) {
        self.computed_start = usage.counter_start;
        self.computed_end = usage.counter_end;
        self.computed_price = unit_price;
        self.computed_anomaly = usage.anomaly;
        self.start_at = usage.start_at;
        self.end_at = Some(usage.end_at);

        if !self.touched.start {
            self.counter_start = usage.counter_start;
        }
        if !self.touched.end {
            self.counter_end = usage.counter_end;
        }
        if !self.touched.price {
            self.unit_price = unit_price;
        }
    }

    /// Billable quantity under the effective values
    pub fn quantity(&self) -> i64 {
        self.counter_end - self.counter_start
    }

    /// Always `unit_price × quantity`, by construction
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity())
    }

    /// Reviewer overrode the counter values themselves
    pub fn overridden(&self) -> bool {
        self.touched.start || self.touched.end
    }

    /// Anomalous and not yet acknowledged by an override
    pub fn blocking_anomaly(&self) -> bool {
        self.computed_anomaly && !self.overridden()
    }
}

/// One device on a review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLine {
    pub device: DeviceId,
    pub device_label: String,
    pub location: pagemeter_common::LocationId,
    pub location_name: String,
    /// Excluded lines stay visible but never reach the invoice
    pub excluded: bool,
    pub notes: Option<String>,
    pub counters: Vec<ReviewCounter>,
}

impl ReviewLine {
    pub fn total_quantity(&self) -> i64 {
        self.counters.iter().map(|c| c.quantity()).sum()
    }

    pub fn subtotal(&self) -> Decimal {
        self.counters.iter().map(|c| c.subtotal()).sum()
    }
}

/// The review aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingReview {
    pub id: ReviewId,
    /// Human-readable reference, e.g. `REV-00042`
    pub reference: String,
    pub partner: PartnerId,
    pub period: BillingPeriod,
    pub group_by_location: bool,
    pub unbilled_only: bool,
    pub state: ReviewState,
    /// Optimistic concurrency version, bumped on every mutation
    pub version: u64,
    pub lines: Vec<ReviewLine>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub invoiced_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Total snapshotted at confirmation time
    pub confirmed_total: Option<Decimal>,
}

impl BillingReview {
    /// Lines that will reach the invoice
    pub fn included_lines(&self) -> impl Iterator<Item = &ReviewLine> {
        self.lines.iter().filter(|l| !l.excluded)
    }

    pub fn total_quantity(&self) -> i64 {
        self.included_lines().map(|l| l.total_quantity()).sum()
    }

    pub fn total_amount(&self) -> Decimal {
        self.included_lines().map(|l| l.subtotal()).sum()
    }

    pub fn device_count(&self) -> usize {
        self.included_lines().count()
    }

    fn line_mut(&mut self, device: DeviceId) -> Result<&mut ReviewLine> {
        self.lines
            .iter_mut()
            .find(|l| l.device == device)
            .ok_or_else(|| {
                MeterError::Referential(format!("device {} is not on this review", device))
            })
    }
}

/// Handle carrying the version a caller last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewRef {
    pub id: ReviewId,
    pub version: u64,
}

/// Options for a billing run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Aggregate invoice lines per location instead of per device
    pub group_by_location: bool,
    /// Skip (device, counter) pairs already covered by an invoiced review
    pub unbilled_only: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            group_by_location: true,
            unbilled_only: true,
        }
    }
}

/// A single counter edit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum CounterEdit {
    Start(i64),
    End(i64),
    UnitPrice(Decimal),
}

/// Review store and workflow service
pub struct ReviewBook {
    catalog: Arc<dyn DeviceCatalog>,
    engine: DeltaEngine,
    registry: Arc<CounterRegistry>,
    prices: Arc<PriceBook>,
    coverage: Arc<CoverageLedger>,
    reviews: DashMap<ReviewId, BillingReview>,
    seq: AtomicU64,
}

impl ReviewBook {
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        store: Arc<ReadingStore>,
        registry: Arc<CounterRegistry>,
        prices: Arc<PriceBook>,
        coverage: Arc<CoverageLedger>,
    ) -> Self {
        Self {
            catalog,
            engine: DeltaEngine::new(store),
            registry,
            prices,
            coverage,
            reviews: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Run the delta engine for every device under `partner` and build
    /// a draft review. Zero-activity devices produce no line; inactive
    /// counter types are tracked but never billed.
    #[instrument(skip(self), fields(partner = %partner, %period))]
    pub fn generate(
        &self,
        partner: PartnerId,
        period: BillingPeriod,
        options: GenerateOptions,
    ) -> Result<ReviewRef> {
        let mut devices = self.catalog.devices_for_partner(partner);
        devices.sort_by(|a, b| a.label.cmp(&b.label));

        let mut lines = Vec::new();
        for device in devices {
            let usage = self.engine.usage_for_device(device.id, &period);
            let mut counters = Vec::new();
            for counter_usage in &usage.counters {
                let Some(counter_type) = self.registry.get(&counter_usage.oid) else {
                    continue;
                };
                if !counter_type.is_billable() {
                    continue;
                }
                if options.unbilled_only
                    && self.coverage.is_covered(device.id, &counter_usage.oid, &period)
                {
                    continue;
                }
                let unit_price = self.prices.price_for(partner, &counter_usage.oid, &self.registry);
                self.registry.add_reference(&counter_usage.oid);
                counters.push(ReviewCounter::from_usage(
                    counter_usage,
                    counter_type.name,
                    unit_price,
                ));
            }
            if counters.is_empty() {
                continue;
            }
            lines.push(ReviewLine {
                device: device.id,
                device_label: device.label,
                location: device.location,
                location_name: device.location_name,
                excluded: false,
                notes: None,
                counters,
            });
        }

        let id = ReviewId::new();
        let reference = format!("REV-{:05}", self.seq.fetch_add(1, Ordering::AcqRel) + 1);
        let review = BillingReview {
            id,
            reference: reference.clone(),
            partner,
            period,
            group_by_location: options.group_by_location,
            unbilled_only: options.unbilled_only,
            state: ReviewState::Draft,
            version: 0,
            lines,
            created_at: Utc::now(),
            confirmed_at: None,
            invoiced_at: None,
            cancelled_at: None,
            confirmed_total: None,
        };
        info!(review = %reference, lines = review.lines.len(), "Generated billing review");
        self.reviews.insert(id, review);
        Ok(ReviewRef { id, version: 0 })
    }

    /// Clone of the current review state.
    pub fn get(&self, id: ReviewId) -> Option<BillingReview> {
        self.reviews.get(&id).map(|r| r.clone())
    }

    /// Current state plus the ref needed to mutate it.
    pub fn load(&self, id: ReviewId) -> Result<(BillingReview, ReviewRef)> {
        let review = self
            .get(id)
            .ok_or_else(|| MeterError::Referential(format!("unknown review {}", id)))?;
        let version = review.version;
        Ok((review, ReviewRef { id, version }))
    }

    /// Run a mutation under the entry lock with a version check. The
    /// closure must not mutate before its own validation passes: a
    /// returned error leaves the review as the caller saw it.
    fn with_review<T>(
        &self,
        rf: &ReviewRef,
        op: impl FnOnce(&mut BillingReview) -> Result<T>,
    ) -> Result<(T, ReviewRef)> {
        let mut entry = self
            .reviews
            .get_mut(&rf.id)
            .ok_or_else(|| MeterError::Referential(format!("unknown review {}", rf.id)))?;
        if entry.version != rf.version {
            return Err(MeterError::ConcurrentModification {
                expected: rf.version,
                found: entry.version,
            });
        }
        let out = op(&mut entry)?;
        entry.version += 1;
        Ok((
            out,
            ReviewRef {
                id: rf.id,
                version: entry.version,
            },
        ))
    }

    fn require_draft(review: &BillingReview, what: &str) -> Result<()> {
        match review.state {
            ReviewState::Draft => Ok(()),
            ReviewState::Invoiced => Err(MeterError::Referential(format!(
                "review {} is invoiced and immutable",
                review.reference
            ))),
            state => Err(MeterError::Validation(format!(
                "cannot {} a {:?} review",
                what, state
            ))),
        }
    }

    /// Edit one counter field, marking it as manually overridden.
    pub fn set_counter_value(
        &self,
        rf: &ReviewRef,
        device: DeviceId,
        oid: &Oid,
        edit: CounterEdit,
    ) -> Result<ReviewRef> {
        let (_, next) = self.with_review(rf, |review| {
            Self::require_draft(review, "edit")?;
            let line = review.line_mut(device)?;
            let counter = line
                .counters
                .iter_mut()
                .find(|c| &c.oid == oid)
                .ok_or_else(|| {
                    MeterError::Referential(format!("counter {} is not on this line", oid))
                })?;
            match edit {
                CounterEdit::Start(value) => {
                    counter.counter_start = value;
                    counter.touched.start = true;
                }
                CounterEdit::End(value) => {
                    counter.counter_end = value;
                    counter.touched.end = true;
                }
                CounterEdit::UnitPrice(price) => {
                    if price < Decimal::ZERO {
                        return Err(MeterError::Validation(
                            "unit price cannot be negative".into(),
                        ));
                    }
                    counter.unit_price = price;
                    counter.touched.price = true;
                }
            }
            Ok(())
        })?;
        Ok(next)
    }

    pub fn set_line_excluded(
        &self,
        rf: &ReviewRef,
        device: DeviceId,
        excluded: bool,
    ) -> Result<ReviewRef> {
        let (_, next) = self.with_review(rf, |review| {
            Self::require_draft(review, "edit")?;
            review.line_mut(device)?.excluded = excluded;
            Ok(())
        })?;
        Ok(next)
    }

    pub fn set_line_notes(
        &self,
        rf: &ReviewRef,
        device: DeviceId,
        notes: Option<String>,
    ) -> Result<ReviewRef> {
        let (_, next) = self.with_review(rf, |review| {
            Self::require_draft(review, "edit")?;
            review.line_mut(device)?.notes = notes;
            Ok(())
        })?;
        Ok(next)
    }

    /// Re-run the delta engine for one line. Computed values are always
    /// refreshed; effective values only where the reviewer never touched
    /// them. Counters that vanished from the ledger are dropped unless
    /// touched; newly billable counters are added.
    #[instrument(skip(self, rf), fields(device = %device))]
    pub fn recompute_line(&self, rf: &ReviewRef, device: DeviceId) -> Result<ReviewRef> {
        let (_, next) = self.with_review(rf, |review| {
            Self::require_draft(review, "recompute")?;
            let period = review.period;
            let partner = review.partner;
            let unbilled_only = review.unbilled_only;

            let fresh = self.engine.usage_for_device(device, &period);
            let line = review.line_mut(device)?;

            // refresh or drop existing counters
            let mut kept = Vec::with_capacity(line.counters.len());
            for mut counter in line.counters.drain(..) {
                match fresh.counters.iter().find(|u| u.oid == counter.oid) {
                    Some(usage) => {
                        let price = self.prices.price_for(partner, &counter.oid, &self.registry);
                        counter.absorb(usage, price);
                        kept.push(counter);
                    }
                    None if counter.touched != TouchedFields::default() => kept.push(counter),
                    None => self.registry.release_reference(&counter.oid),
                }
            }

            // pick up counters that appeared since generation
            for usage in &fresh.counters {
                if kept.iter().any(|c| c.oid == usage.oid) {
                    continue;
                }
                let Some(counter_type) = self.registry.get(&usage.oid) else {
                    continue;
                };
                if !counter_type.is_billable() {
                    continue;
                }
                if unbilled_only && self.coverage.is_covered(device, &usage.oid, &period) {
                    continue;
                }
                let price = self.prices.price_for(partner, &usage.oid, &self.registry);
                self.registry.add_reference(&usage.oid);
                kept.push(ReviewCounter::from_usage(usage, counter_type.name, price));
            }

            line.counters = kept;
            Ok(())
        })?;
        Ok(next)
    }

    /// Validate and move the review to `confirmed`, snapshotting totals.
    #[instrument(skip(self, rf))]
    pub fn confirm(&self, rf: &ReviewRef) -> Result<ReviewRef> {
        let (reference, next) = self.with_review(rf, |review| {
            Self::require_draft(review, "confirm")?;

            if review.included_lines().next().is_none() {
                return Err(MeterError::Validation(
                    "review has no non-excluded lines to confirm".into(),
                ));
            }
            for line in review.included_lines() {
                if let Some(counter) = line.counters.iter().find(|c| c.blocking_anomaly()) {
                    return Err(MeterError::Validation(format!(
                        "counter {} on {} went backwards ({} -> {}); override the values or exclude the line",
                        counter.oid,
                        line.device_label,
                        counter.computed_start,
                        counter.computed_end
                    )));
                }
            }

            review.state = ReviewState::Confirmed;
            review.confirmed_at = Some(Utc::now());
            review.confirmed_total = Some(review.total_amount());
            Ok(review.reference.clone())
        })?;
        info!(review = %reference, "Confirmed billing review");
        Ok(next)
    }

    /// Discard the review from `draft` or `confirmed`. Releases its
    /// counter references and any coverage it held.
    #[instrument(skip(self, rf))]
    pub fn cancel(&self, rf: &ReviewRef) -> Result<ReviewRef> {
        let (reference, next) = self.with_review(rf, |review| {
            match review.state {
                ReviewState::Draft | ReviewState::Confirmed => {}
                ReviewState::Invoiced => {
                    return Err(MeterError::Referential(format!(
                        "review {} is invoiced and cannot be cancelled",
                        review.reference
                    )))
                }
                ReviewState::Cancelled => {
                    return Err(MeterError::Validation("review is already cancelled".into()))
                }
            }
            review.state = ReviewState::Cancelled;
            review.cancelled_at = Some(Utc::now());
            for line in &review.lines {
                for counter in &line.counters {
                    self.registry.release_reference(&counter.oid);
                }
            }
            Ok(review.reference.clone())
        })?;
        self.coverage.release(rf.id);
        info!(review = %reference, "Cancelled billing review");
        Ok(next)
    }

    /// Emit invoice lines from a confirmed review and mark its coverage
    /// as billed. Irreversible.
    #[instrument(skip(self, rf))]
    pub fn invoice(&self, rf: &ReviewRef) -> Result<(Vec<InvoiceLine>, ReviewRef)> {
        let ((reference, invoice_lines), next) = self.with_review(rf, |review| {
            match review.state {
                ReviewState::Confirmed => {}
                ReviewState::Draft => {
                    return Err(MeterError::Validation(
                        "review must be confirmed before invoicing".into(),
                    ))
                }
                ReviewState::Invoiced => {
                    return Err(MeterError::Referential(format!(
                        "review {} is already invoiced",
                        review.reference
                    )))
                }
                ReviewState::Cancelled => {
                    return Err(MeterError::Validation("review is cancelled".into()))
                }
            }

            let lines = build_invoice_lines(review);
            for line in review.lines.iter().filter(|l| !l.excluded) {
                for counter in &line.counters {
                    self.coverage
                        .mark(line.device, &counter.oid, review.period, review.id);
                }
            }
            review.state = ReviewState::Invoiced;
            review.invoiced_at = Some(Utc::now());
            Ok((review.reference.clone(), lines))
        })?;
        info!(review = %reference, lines = invoice_lines.len(), "Invoiced billing review");
        Ok((invoice_lines, next))
    }
}
