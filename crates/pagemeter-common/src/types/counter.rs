//! Counter type catalog entries
//!
//! A counter type attaches billing metadata to an [`Oid`]. Unknown oids
//! are auto-created in an unconfigured state the first time a reading
//! mentions them, so operators configure the catalog after the fact
//! instead of pre-seeding it.

use super::ids::{Oid, ProductId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Billing metadata for one counter identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterType {
    /// Globally unique counter identifier
    pub oid: Oid,
    /// Human-readable name, editable
    pub name: String,
    /// Short alphanumeric code for programmatic reference
    pub code: String,
    /// Billable product this counter maps to, if configured
    pub product: Option<ProductId>,
    /// Default price per unit (page); partner price books may override
    pub unit_price: Decimal,
    /// Inactive types are tracked but excluded from billing runs
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl CounterType {
    /// Unconfigured entry as created on first sighting of an oid.
    pub fn unconfigured(oid: Oid) -> Self {
        let code = format!("auto_{}", oid.as_str().replace('.', "_"));
        Self {
            name: format!("Counter {}", oid),
            code,
            product: None,
            unit_price: Decimal::ZERO,
            active: false,
            created_at: Utc::now(),
            oid,
        }
    }

    pub fn is_billable(&self) -> bool {
        self.active
    }
}

/// Partial update applied by [`configure`](crate::types::counter)
/// operations; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterTypeUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub product: Option<ProductId>,
    pub unit_price: Option<Decimal>,
    pub active: Option<bool>,
}

impl CounterTypeUpdate {
    pub fn apply(&self, target: &mut CounterType) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(code) = &self.code {
            target.code = code.clone();
        }
        if let Some(product) = self.product {
            target.product = Some(product);
        }
        if let Some(price) = self.unit_price {
            target.unit_price = price;
        }
        if let Some(active) = self.active {
            target.active = active;
        }
    }
}
