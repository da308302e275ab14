//! Pipeline step implementations.
//!
//! Pantry: fetch-raw → normalize → analyze-expiry → compute-vectors → persist
//! Preference: fetch-interactions → analyze-dietary-signals →
//! build-preference-vector → persist

pub mod dietary;
pub mod expiry;
pub mod fetch;
pub mod normalize;
pub mod persist;
pub mod preference_vector;
pub mod vectors;

pub use dietary::AnalyzeDietarySignalsStep;
pub use expiry::AnalyzeExpiryStep;
pub use fetch::{FetchInteractionsStep, FetchPantryStep};
pub use normalize::NormalizeStep;
pub use persist::{PersistPantryStep, PersistPreferenceStep};
pub use preference_vector::{BuildPreferenceVectorStep, PREFERENCE_VECTOR_LEN};
pub use vectors::ComputeVectorsStep;
