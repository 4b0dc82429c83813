//! Partner price book
//!
//! Unit prices resolve in order: partner-specific override, then the
//! counter type's default price, then zero. A zero price means "track
//! but do not charge" and is what unconfigured counter types bill at.

use dashmap::DashMap;
use pagemeter_common::{MeterError, Oid, PartnerId, Result};
use pagemeter_metering::CounterRegistry;
use rust_decimal::Decimal;
use tracing::debug;

/// Per-(partner, counter) unit price overrides
#[derive(Default)]
pub struct PriceBook {
    overrides: DashMap<(PartnerId, Oid), Decimal>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self {
            overrides: DashMap::new(),
        }
    }

    /// Set or replace the override for one partner/counter pair.
    pub fn set_price(&self, partner: PartnerId, oid: Oid, unit_price: Decimal) -> Result<()> {
        if unit_price < Decimal::ZERO {
            return Err(MeterError::Validation(format!(
                "unit price cannot be negative: {}",
                unit_price
            )));
        }
        self.overrides.insert((partner, oid), unit_price);
        Ok(())
    }

    pub fn clear_price(&self, partner: PartnerId, oid: &Oid) {
        self.overrides.remove(&(partner, oid.clone()));
    }

    /// Resolve the effective unit price for a billing run.
    pub fn price_for(&self, partner: PartnerId, oid: &Oid, registry: &CounterRegistry) -> Decimal {
        if let Some(price) = self.overrides.get(&(partner, oid.clone())) {
            debug!(partner = %partner, oid = %oid, price = %*price, "Partner price override");
            return *price;
        }
        registry
            .get(oid)
            .map(|ct| ct.unit_price)
            .unwrap_or(Decimal::ZERO)
    }
}
