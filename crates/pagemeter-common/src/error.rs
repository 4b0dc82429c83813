//! Error types for the Pagemeter engine
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using MeterError
pub type Result<T> = std::result::Result<T, MeterError>;

/// Unified error type for Pagemeter operations
#[derive(Debug, Error)]
pub enum MeterError {
    /// Reading references a device the engine has never been told about.
    /// Devices are created by the sync path, never implicitly by ingestion.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Token resolution failed: missing, unknown, inactive, or scoped to
    /// an inactive location.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An edit conflicts with existing references, or a record in a
    /// terminal state was mutated.
    #[error("Referential error: {0}")]
    Referential(String),

    /// A state transition was attempted on an aggregate that does not
    /// satisfy its preconditions. The aggregate is left unchanged.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic-lock loss: the caller's snapshot is stale and must be
    /// reloaded before retrying.
    #[error("Concurrent modification: expected version {expected}, found {found}")]
    ConcurrentModification { expected: u64, found: u64 },

    // Ingestion errors
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-record ingestion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Reading carries no counter values")]
    EmptyCounters,

    #[error("Device reference not found in location: {0}")]
    UnknownDeviceRef(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

// Implement From for common external error types
impl From<serde_json::Error> for MeterError {
    fn from(err: serde_json::Error) -> Self {
        MeterError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for MeterError {
    fn from(err: std::io::Error) -> Self {
        MeterError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeterError::UnknownDevice("10.0.0.14".to_string());
        assert!(err.to_string().contains("10.0.0.14"));
    }

    #[test]
    fn test_concurrent_modification_display() {
        let err = MeterError::ConcurrentModification {
            expected: 3,
            found: 4,
        };
        assert!(err.to_string().contains("expected version 3"));
    }

    #[test]
    fn test_ingest_error_conversion() {
        let err: MeterError = IngestError::EmptyCounters.into();
        assert!(matches!(err, MeterError::Ingest(IngestError::EmptyCounters)));
    }
}
