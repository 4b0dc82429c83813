//! Typed identifiers
//!
//! Every entity gets its own UUID newtype so a device id can never be
//! handed to an API expecting a review id. [`Oid`] is the one exception:
//! it is the opaque counter key exactly as devices report it, so it stays
//! a string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// One metered device (printer)
    DeviceId
);
uuid_id!(
    /// One physical location holding devices
    LocationId
);
uuid_id!(
    /// Billing partner (the invoiced customer)
    PartnerId
);
uuid_id!(
    /// Billable product referenced by a counter type
    ProductId
);
uuid_id!(
    /// One billing review aggregate
    ReviewId
);

/// Opaque counter identifier as reported by a device (SNMP OID or an
/// internal legacy key). Globally unique across the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(pub String);

impl Oid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Oid {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Oid {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        let a = DeviceId::new();
        let b = DeviceId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_oid_from_str() {
        let oid = Oid::from("1.3.6.1.2.1.43.10.2.1.4.1.1");
        assert_eq!(oid.as_str(), "1.3.6.1.2.1.43.10.2.1.4.1.1");
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.43.10.2.1.4.1.1");
    }

    #[test]
    fn test_oid_serde_transparent() {
        let oid = Oid::from("legacy.total");
        let json = serde_json::to_string(&oid).unwrap();
        assert_eq!(json, "\"legacy.total\"");
    }
}
