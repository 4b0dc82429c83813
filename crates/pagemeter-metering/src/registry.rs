//! Counter type registry
//!
//! Schema-on-write catalog: the first reading that mentions an unknown
//! OID creates an unconfigured [`CounterType`], and operators fill in
//! name, product, and price later. Entries referenced by readings or
//! review counters cannot be removed.

use dashmap::DashMap;
use pagemeter_common::{CounterType, CounterTypeUpdate, MeterError, Oid, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct RegistryEntry {
    counter: CounterType,
    /// Live references from readings and review counters
    references: Arc<AtomicU64>,
}

/// Concurrent counter type catalog keyed by OID
#[derive(Default)]
pub struct CounterRegistry {
    entries: DashMap<Oid, RegistryEntry>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Idempotent get-or-create. New entries start inactive, unpriced,
    /// and unlinked to any product.
    pub fn ensure(&self, oid: &Oid) -> CounterType {
        let entry = self.entries.entry(oid.clone()).or_insert_with(|| {
            info!(oid = %oid, "Auto-created unconfigured counter type");
            RegistryEntry {
                counter: CounterType::unconfigured(oid.clone()),
                references: Arc::new(AtomicU64::new(0)),
            }
        });
        entry.counter.clone()
    }

    /// Look up without creating.
    pub fn get(&self, oid: &Oid) -> Option<CounterType> {
        self.entries.get(oid).map(|e| e.counter.clone())
    }

    /// Apply a partial configuration update to an existing entry.
    pub fn configure(&self, oid: &Oid, update: &CounterTypeUpdate) -> Result<CounterType> {
        let mut entry = self.entries.get_mut(oid).ok_or_else(|| {
            MeterError::Referential(format!("cannot configure unknown counter type {}", oid))
        })?;
        update.apply(&mut entry.counter);
        debug!(oid = %oid, active = entry.counter.active, "Configured counter type");
        Ok(entry.counter.clone())
    }

    /// Remove an entry. Fails while any reading or review counter still
    /// references the oid.
    pub fn remove(&self, oid: &Oid) -> Result<()> {
        let referenced = match self.entries.get(oid) {
            Some(entry) => entry.references.load(Ordering::Acquire),
            None => {
                return Err(MeterError::Referential(format!(
                    "unknown counter type {}",
                    oid
                )))
            }
        };
        if referenced > 0 {
            return Err(MeterError::Referential(format!(
                "counter type {} is referenced {} times and cannot be removed",
                oid, referenced
            )));
        }
        self.entries.remove(oid);
        Ok(())
    }

    /// Record one live reference to an oid (reading row or review counter).
    pub fn add_reference(&self, oid: &Oid) {
        if let Some(entry) = self.entries.get(oid) {
            entry.references.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drop a previously recorded reference (review cancelled).
    pub fn release_reference(&self, oid: &Oid) {
        if let Some(entry) = self.entries.get(oid) {
            let _ = entry
                .references
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    pub fn reference_count(&self, oid: &Oid) -> u64 {
        self.entries
            .get(oid)
            .map(|e| e.references.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Snapshot of every catalog entry.
    pub fn all(&self) -> Vec<CounterType> {
        self.entries.iter().map(|e| e.counter.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = CounterRegistry::new();
        let oid = Oid::from("1.3.6.1.2.1.43.10.2.1.4.1.1");

        let first = registry.ensure(&oid);
        let second = registry.ensure(&oid);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.created_at, second.created_at);
        assert!(!first.active);
    }

    #[test]
    fn test_configure_unknown_oid_fails() {
        let registry = CounterRegistry::new();
        let err = registry
            .configure(&Oid::from("nope"), &CounterTypeUpdate::default())
            .unwrap_err();
        assert!(matches!(err, MeterError::Referential(_)));
    }

    #[test]
    fn test_configure_updates_entry() {
        let registry = CounterRegistry::new();
        let oid = Oid::from("legacy.color");
        registry.ensure(&oid);

        let update = CounterTypeUpdate {
            name: Some("Color pages".into()),
            unit_price: Some(dec!(0.10)),
            active: Some(true),
            ..Default::default()
        };
        let configured = registry.configure(&oid, &update).unwrap();
        assert!(configured.active);
        assert_eq!(configured.unit_price, dec!(0.10));
    }

    #[test]
    fn test_remove_blocked_while_referenced() {
        let registry = CounterRegistry::new();
        let oid = Oid::from("legacy.total");
        registry.ensure(&oid);
        registry.add_reference(&oid);

        let err = registry.remove(&oid).unwrap_err();
        assert!(matches!(err, MeterError::Referential(_)));

        registry.release_reference(&oid);
        assert!(registry.remove(&oid).is_ok());
        assert!(registry.get(&oid).is_none());
    }

    #[test]
    fn test_release_never_underflows() {
        let registry = CounterRegistry::new();
        let oid = Oid::from("legacy.total");
        registry.ensure(&oid);
        registry.release_reference(&oid);
        assert_eq!(registry.reference_count(&oid), 0);
    }
}
