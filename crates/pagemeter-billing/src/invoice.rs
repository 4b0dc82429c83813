//! Invoice line emission
//!
//! Pure transformation from a review's effective values to invoice
//! lines. Two shapes:
//!
//! - per-device: one line per (device, counter), carrying the counter
//!   range in the description for the customer to verify
//! - grouped by location: quantities summed per (location, counter,
//!   unit price); splitting on price keeps `subtotal = qty × price`
//!   true on every emitted line

use crate::review::BillingReview;
use pagemeter_common::{DeviceId, LocationId, Oid, PartnerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What an invoice line bills against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InvoiceTarget {
    Device { id: DeviceId, label: String },
    Location { id: LocationId, name: String },
}

/// One emitted invoice line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub partner: PartnerId,
    pub target: InvoiceTarget,
    pub oid: Oid,
    pub counter_name: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Emit invoice lines for every non-excluded line of `review`, honoring
/// its grouping mode. Zero-quantity rows are kept: a line the reviewer
/// chose to include documents the covered range even when it bills
/// nothing.
pub fn build_invoice_lines(review: &BillingReview) -> Vec<InvoiceLine> {
    if review.group_by_location {
        grouped_by_location(review)
    } else {
        per_device(review)
    }
}

fn per_device(review: &BillingReview) -> Vec<InvoiceLine> {
    let mut lines = Vec::new();
    for line in review.included_lines() {
        for counter in &line.counters {
            let mut description = format!(
                "{} / {} ({} -> {})",
                line.device_label,
                counter.name,
                counter.counter_start,
                counter.counter_end
            );
            if let Some(notes) = &line.notes {
                description.push('\n');
                description.push_str(notes);
            }
            lines.push(InvoiceLine {
                partner: review.partner,
                target: InvoiceTarget::Device {
                    id: line.device,
                    label: line.device_label.clone(),
                },
                oid: counter.oid.clone(),
                counter_name: counter.name.clone(),
                description,
                quantity: counter.quantity(),
                unit_price: counter.unit_price,
                subtotal: counter.subtotal(),
            });
        }
    }
    lines
}

fn grouped_by_location(review: &BillingReview) -> Vec<InvoiceLine> {
    struct Bucket {
        name: String,
        counter_name: String,
        quantity: i64,
        devices: usize,
    }

    // BTreeMap keyed on (location, oid, price) keeps output order
    // deterministic across runs
    let mut buckets: BTreeMap<(LocationId, Oid, Decimal), Bucket> = BTreeMap::new();
    for line in review.included_lines() {
        for counter in &line.counters {
            let key = (line.location, counter.oid.clone(), counter.unit_price);
            buckets
                .entry(key)
                .and_modify(|b| {
                    b.quantity += counter.quantity();
                    b.devices += 1;
                })
                .or_insert_with(|| Bucket {
                    name: line.location_name.clone(),
                    counter_name: counter.name.clone(),
                    quantity: counter.quantity(),
                    devices: 1,
                });
        }
    }

    buckets
        .into_iter()
        .map(|((location, oid, unit_price), bucket)| InvoiceLine {
            partner: review.partner,
            target: InvoiceTarget::Location {
                id: location,
                name: bucket.name.clone(),
            },
            oid,
            counter_name: bucket.counter_name.clone(),
            description: format!(
                "{} / {} ({} device{})",
                bucket.name,
                bucket.counter_name,
                bucket.devices,
                if bucket.devices == 1 { "" } else { "s" }
            ),
            quantity: bucket.quantity,
            unit_price,
            subtotal: unit_price * Decimal::from(bucket.quantity),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{ReviewCounter, ReviewLine, ReviewState, TouchedFields};
    use chrono::Utc;
    use pagemeter_common::{BillingPeriod, ReviewId};
    use rust_decimal_macros::dec;

    fn counter(oid: &str, start: i64, end: i64, price: Decimal) -> ReviewCounter {
        ReviewCounter {
            oid: Oid::from(oid),
            name: format!("Counter {}", oid),
            computed_start: start,
            computed_end: end,
            computed_price: price,
            computed_anomaly: false,
            start_at: None,
            end_at: Some(Utc::now()),
            counter_start: start,
            counter_end: end,
            unit_price: price,
            touched: TouchedFields::default(),
        }
    }

    fn line(label: &str, location: LocationId, counters: Vec<ReviewCounter>) -> ReviewLine {
        ReviewLine {
            device: DeviceId::new(),
            device_label: label.into(),
            location,
            location_name: "Main Office".into(),
            excluded: false,
            notes: None,
            counters,
        }
    }

    fn review(group_by_location: bool, lines: Vec<ReviewLine>) -> BillingReview {
        BillingReview {
            id: ReviewId::new(),
            reference: "REV-00001".into(),
            partner: PartnerId::new(),
            period: BillingPeriod::from_dates((2025, 2, 1), (2025, 3, 1)).unwrap(),
            group_by_location,
            unbilled_only: true,
            state: ReviewState::Confirmed,
            version: 1,
            lines,
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
            invoiced_at: None,
            cancelled_at: None,
            confirmed_total: None,
        }
    }

    #[test]
    fn test_per_device_carries_counter_range() {
        let loc = LocationId::new();
        let review = review(
            false,
            vec![line("printer-01", loc, vec![counter("mono", 1500, 2100, dec!(0.02))])],
        );

        let lines = build_invoice_lines(&review);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 600);
        assert_eq!(lines[0].subtotal, dec!(12.00));
        assert!(lines[0].description.contains("1500 -> 2100"));
        assert!(matches!(lines[0].target, InvoiceTarget::Device { .. }));
    }

    #[test]
    fn test_grouped_sums_same_price_and_splits_different() {
        let loc = LocationId::new();
        let review = review(
            true,
            vec![
                line("printer-01", loc, vec![counter("mono", 0, 100, dec!(0.02))]),
                line("printer-02", loc, vec![counter("mono", 0, 300, dec!(0.02))]),
                // overridden price keeps its own line
                line("printer-03", loc, vec![counter("mono", 0, 50, dec!(0.01))]),
            ],
        );

        let lines = build_invoice_lines(&review);
        assert_eq!(lines.len(), 2);

        let cheap = lines.iter().find(|l| l.unit_price == dec!(0.01)).unwrap();
        assert_eq!(cheap.quantity, 50);
        assert_eq!(cheap.subtotal, dec!(0.50));

        let merged = lines.iter().find(|l| l.unit_price == dec!(0.02)).unwrap();
        assert_eq!(merged.quantity, 400);
        assert_eq!(merged.subtotal, dec!(8.00));
        assert!(merged.description.contains("2 devices"));

        for l in &lines {
            assert_eq!(l.subtotal, l.unit_price * Decimal::from(l.quantity));
        }
    }

    #[test]
    fn test_excluded_lines_never_reach_invoice() {
        let loc = LocationId::new();
        let mut excluded = line("printer-01", loc, vec![counter("mono", 0, 100, dec!(0.02))]);
        excluded.excluded = true;
        let review = review(true, vec![excluded]);

        assert!(build_invoice_lines(&review).is_empty());
    }

    #[test]
    fn test_zero_quantity_line_kept() {
        let loc = LocationId::new();
        let review = review(
            false,
            vec![line("printer-01", loc, vec![counter("mono", 500, 500, dec!(0.02))])],
        );

        let lines = build_invoice_lines(&review);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 0);
        assert_eq!(lines[0].subtotal, Decimal::ZERO);
    }
}
