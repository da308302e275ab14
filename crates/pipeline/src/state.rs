//! Mutable state threaded through each pipeline.
//!
//! Every stage starts at its default value. A stage that stays default after
//! a run means the step owning it was skipped.

use artifacts::{ExpiryAnalysis, PantryItem, UserId};
use sources::{Interaction, RawPantryItem, UserProfile};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct PantryState {
    pub user_id: UserId,
    pub raw_items: Vec<RawPantryItem>,
    pub items: Vec<PantryItem>,
    pub expiry: ExpiryAnalysis,
    pub vectors: Vec<Vec<f64>>,
}

impl PantryState {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

/// Explicit and inferred preference signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DietarySignals {
    pub restrictions: BTreeSet<String>,
    pub allergens: BTreeSet<String>,
    /// Restrictions inferred from tags; a subset of `restrictions`
    pub inferred: BTreeSet<String>,
    pub cuisine_scores: BTreeMap<String, f64>,
    /// Mean of all ratings, 0 when nothing was rated
    pub mean_rating: f64,
    pub rated_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PreferenceState {
    pub user_id: UserId,
    pub profile: UserProfile,
    pub interactions: Vec<Interaction>,
    pub signals: DietarySignals,
    pub vector: Vec<f64>,
}

impl PreferenceState {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}
