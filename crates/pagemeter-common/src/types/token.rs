//! Location-scoped ingestion tokens
//!
//! A collector authenticates every call with an opaque token scoped to
//! one location. The plaintext secret is surfaced exactly once, at
//! generation time; the engine only ever stores its blake3 hash, so a
//! stored token can never be reversed.

use crate::TOKEN_SECRET_BYTES;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Freshly generated token secret. Hand this to the collector operator
/// and drop it; it cannot be recovered later.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Generate new random token material
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let mut encoded = String::with_capacity(TOKEN_SECRET_BYTES * 2);
        for b in bytes {
            encoded.push_str(&format!("{:02x}", b));
        }
        Self(encoded)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Hash as stored and compared by the engine
    pub fn digest(&self) -> String {
        hash_token(&self.0)
    }
}

// Keep secrets out of logs
impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenSecret(***)")
    }
}

/// Hash presented token material for lookup
pub fn hash_token(presented: &str) -> String {
    blake3::hash(presented.as_bytes()).to_hex().to_string()
}

/// Stored credential state for one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// blake3 hex digest of the secret
    pub digest: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Number of authenticated requests served with this token
    pub request_count: u64,
}

impl TokenRecord {
    /// Issue a new record; returns the one-time secret alongside it.
    pub fn issue() -> (Self, TokenSecret) {
        let secret = TokenSecret::generate();
        let record = Self {
            digest: secret.digest(),
            active: true,
            created_at: Utc::now(),
            last_used: None,
            request_count: 0,
        };
        (record, secret)
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.active && self.digest == hash_token(presented)
    }

    pub fn touch(&mut self) {
        self.last_used = Some(Utc::now());
        self.request_count += 1;
    }
}
