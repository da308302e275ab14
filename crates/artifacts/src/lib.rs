//! # Artifacts Crate
//!
//! Domain model for precomputed recommendation artifacts and the scheme
//! used to key them in the shared cache.
//!
//! ## Main Components
//!
//! - **types**: `Artifact` envelope, the pantry / preference / recipe
//!   payloads and the `Freshness` capability
//! - **key**: `ArtifactType`, `CacheKey` and `build_key`
//! - **clock**: `Clock` abstraction (system and manual clocks)
//! - **error**: Error types for encoding, decoding and key parsing
//!
//! ## Example Usage
//!
//! ```ignore
//! use artifacts::{Artifact, ArtifactType, CacheKey, Freshness};
//!
//! let key = CacheKey::new(ArtifactType::Pantry, 42);
//! assert_eq!(key.to_string(), "pantry:42");
//!
//! let raw = artifact.to_json()?;
//! let decoded = Artifact::from_json(&raw)?;
//! assert!(decoded.is_fresh(clock.now()));
//! ```

pub mod clock;
pub mod error;
pub mod key;
pub mod types;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ArtifactError, Result};
pub use key::{build_key, is_word_token, ArtifactType, CacheKey, UserId};
pub use types::{
    is_fresh, is_fresh_at, Artifact, ArtifactPayload, ExpiryAnalysis, ExpiryBucket, Freshness,
    PantryArtifact, PantryItem, PreferenceArtifact, RecipeArtifact, RecipeSummary,
};
