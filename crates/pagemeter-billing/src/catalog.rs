//! Device catalog seam
//!
//! Billing runs enumerate a partner's devices, but the fleet directory
//! (devices, locations, tokens) is owned by the sync layer. This trait
//! is the boundary between the two.

use pagemeter_common::{DeviceId, LocationId, PartnerId};

/// What a billing run needs to know about a device
#[derive(Debug, Clone)]
pub struct CatalogDevice {
    pub id: DeviceId,
    pub label: String,
    pub location: LocationId,
    pub location_name: String,
}

/// Read-only view of a partner's fleet
pub trait DeviceCatalog: Send + Sync {
    /// Every device under the partner's locations, including
    /// soft-deactivated ones (their readings may still be billable).
    fn devices_for_partner(&self, partner: PartnerId) -> Vec<CatalogDevice>;
}
