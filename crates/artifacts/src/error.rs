//! Error types for the artifacts crate.

use thiserror::Error;

/// Errors raised while building keys or encoding/decoding artifacts.
///
/// A `Deserialization` error means a cached payload is corrupt. Callers
/// must treat it exactly like a cache miss and delete the offending entry.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Cached payload could not be decoded, or decoded into an artifact
    /// that violates one of its invariants
    #[error("Failed to deserialize artifact: {reason}")]
    Deserialization { reason: String },

    /// Artifact could not be encoded for storage
    #[error("Failed to serialize artifact: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key text or key component is not valid
    #[error("Invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

impl ArtifactError {
    pub fn deserialization(reason: impl Into<String>) -> Self {
        Self::Deserialization {
            reason: reason.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, ArtifactError>;
