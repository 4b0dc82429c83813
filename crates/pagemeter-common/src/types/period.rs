//! Billing period arithmetic
//!
//! A period is always half-open `[from, to)`: a reading stamped exactly
//! at `to` belongs to the next period. This is what makes adjacent
//! periods sum without double counting.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Half-open billing window `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl BillingPeriod {
    /// Build a period; `from` must precede `to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        if from < to {
            Some(Self { from, to })
        } else {
            None
        }
    }

    /// Convenience constructor from calendar dates, midnight UTC.
    pub fn from_dates(
        from: (i32, u32, u32),
        to: (i32, u32, u32),
    ) -> Option<Self> {
        let f = Utc
            .with_ymd_and_hms(from.0, from.1, from.2, 0, 0, 0)
            .single()?;
        let t = Utc.with_ymd_and_hms(to.0, to.1, to.2, 0, 0, 0).single()?;
        Self::new(f, t)
    }

    /// Instant lies within `[from, to)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant < self.to
    }

    /// Two half-open ranges share at least one instant.
    pub fn overlaps(&self, other: &BillingPeriod) -> bool {
        self.from < other.to && other.from < self.to
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} .. {})",
            self.from.format("%Y-%m-%d %H:%M"),
            self.to.format("%Y-%m-%d %H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(f: (i32, u32, u32), t: (i32, u32, u32)) -> BillingPeriod {
        BillingPeriod::from_dates(f, t).unwrap()
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(BillingPeriod::from_dates((2025, 2, 1), (2025, 1, 1)).is_none());
        assert!(BillingPeriod::from_dates((2025, 1, 1), (2025, 1, 1)).is_none());
    }

    #[test]
    fn test_half_open_contains() {
        let p = period((2025, 2, 1), (2025, 3, 1));
        assert!(p.contains(p.from));
        assert!(!p.contains(p.to));
    }

    #[test]
    fn test_adjacent_periods_do_not_overlap() {
        let p1 = period((2025, 1, 1), (2025, 2, 1));
        let p2 = period((2025, 2, 1), (2025, 3, 1));
        assert!(!p1.overlaps(&p2));
        assert!(!p2.overlaps(&p1));
    }

    #[test]
    fn test_sub_range_overlaps() {
        let outer = period((2025, 1, 1), (2025, 4, 1));
        let inner = period((2025, 2, 1), (2025, 3, 1));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }
}
