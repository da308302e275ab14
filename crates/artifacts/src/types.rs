//! Core artifact types.
//!
//! An artifact is a precomputed, TTL-bound result owned by one user. The
//! three payload kinds share a common header (owner, last update, TTL) and
//! are stored as one tagged union so a single cache entry always decodes
//! into exactly one well-typed payload.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ArtifactError, Result};
use crate::key::{ArtifactType, UserId};

// =============================================================================
// Freshness
// =============================================================================

/// Anything with a last-update timestamp and a TTL.
pub trait Freshness {
    fn last_updated(&self) -> DateTime<Utc>;

    fn ttl_seconds(&self) -> u64;

    /// `(now - last_updated) < ttl_seconds`. At the exact boundary the
    /// value is already stale.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        is_fresh_at(self.last_updated(), self.ttl_seconds(), now)
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_updated())
    }

    fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_seconds())
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.last_updated().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Pure freshness predicate shared by every `Freshness` implementor.
pub fn is_fresh_at(last_updated: DateTime<Utc>, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
    // Truncating to whole milliseconds is exact here because the TTL is a
    // whole number of seconds
    let age_ms = i128::from(now.signed_duration_since(last_updated).num_milliseconds());
    age_ms < i128::from(ttl_seconds) * 1000
}

/// Free-function form of [`Freshness::is_fresh`].
pub fn is_fresh(artifact: &impl Freshness, now: DateTime<Utc>) -> bool {
    artifact.is_fresh(now)
}

// =============================================================================
// Artifact envelope
// =============================================================================

/// A cached, precomputed result for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub owner_key: UserId,
    pub last_updated: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub payload: ArtifactPayload,
}

/// Type-specific artifact content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Pantry(PantryArtifact),
    Preferences(PreferenceArtifact),
    Recipes(RecipeArtifact),
}

impl Artifact {
    pub fn new(
        owner_key: UserId,
        payload: ArtifactPayload,
        last_updated: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            owner_key,
            last_updated,
            ttl_seconds,
            payload,
        }
    }

    pub fn artifact_type(&self) -> ArtifactType {
        match self.payload {
            ArtifactPayload::Pantry(_) => ArtifactType::Pantry,
            ArtifactPayload::Preferences(_) => ArtifactType::Preferences,
            ArtifactPayload::Recipes(_) => ArtifactType::Recipes,
        }
    }

    pub fn as_pantry(&self) -> Option<&PantryArtifact> {
        match &self.payload {
            ArtifactPayload::Pantry(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_preferences(&self) -> Option<&PreferenceArtifact> {
        match &self.payload {
            ArtifactPayload::Preferences(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_recipes(&self) -> Option<&RecipeArtifact> {
        match &self.payload {
            ArtifactPayload::Recipes(r) => Some(r),
            _ => None,
        }
    }

    /// Encode for storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored payload, rejecting anything malformed or any
    /// artifact that breaks a payload invariant.
    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: Artifact = serde_json::from_str(raw)
            .map_err(|e| ArtifactError::deserialization(e.to_string()))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check the payload invariants.
    pub fn validate(&self) -> Result<()> {
        match &self.payload {
            ArtifactPayload::Pantry(p) => p.validate(),
            ArtifactPayload::Preferences(p) => p.validate(),
            ArtifactPayload::Recipes(r) => r.validate(),
        }
    }
}

impl Freshness for Artifact {
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

// =============================================================================
// Pantry
// =============================================================================

/// One normalized pantry item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PantryItem {
    /// Name as entered by the user
    pub name: String,
    /// Lowercased, whitespace-collapsed name used for matching
    pub normalized_name: String,
    pub quantity: f64,
    /// Canonical unit ("g", "kg", "ml", "l", "pc", ...)
    pub unit: String,
    pub category: Option<String>,
    /// Expiry date as provided (`YYYY-MM-DD`)
    pub expires_on: Option<String>,
    /// Filled in by expiry analysis; `None` when undated or not analyzed
    pub days_until_expiry: Option<i64>,
}

/// Expiry bucket for a pantry item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryBucket {
    Expired,
    ExpiringSoon,
    ExpiringThisWeek,
    Fresh,
}

impl ExpiryBucket {
    pub const ALL: [ExpiryBucket; 4] = [
        ExpiryBucket::Expired,
        ExpiryBucket::ExpiringSoon,
        ExpiryBucket::ExpiringThisWeek,
        ExpiryBucket::Fresh,
    ];

    /// Bucket by days until expiry: `<0` expired, `0..=3` expiring soon,
    /// `4..=7` expiring this week, `>7` fresh.
    pub fn from_days(days_until_expiry: i64) -> Self {
        match days_until_expiry {
            d if d < 0 => ExpiryBucket::Expired,
            0..=3 => ExpiryBucket::ExpiringSoon,
            4..=7 => ExpiryBucket::ExpiringThisWeek,
            _ => ExpiryBucket::Fresh,
        }
    }

    /// Items in this bucket should be used first.
    pub fn is_urgent(&self) -> bool {
        matches!(self, ExpiryBucket::Expired | ExpiryBucket::ExpiringSoon)
    }
}

/// Result of the expiry analysis. The default value (no buckets) means the
/// analysis did not run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpiryAnalysis {
    pub buckets: BTreeMap<ExpiryBucket, usize>,
    /// `(expired + expiring_soon) / total_items`, 0 for an empty pantry
    pub urgency_score: f64,
    /// Normalized names of expired / expiring-soon items
    pub priority_items: Vec<String>,
}

impl ExpiryAnalysis {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn count(&self, bucket: ExpiryBucket) -> usize {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PantryArtifact {
    pub normalized_items: Vec<PantryItem>,
    pub expiry_analysis: ExpiryAnalysis,
    /// One vector per item, or empty when vectors were not computed
    pub ingredient_vectors: Vec<Vec<f64>>,
    /// Provenance of the run that produced this artifact (steps, counts)
    #[serde(default)]
    pub processing_data: serde_json::Value,
}

impl PantryArtifact {
    pub fn validate(&self) -> Result<()> {
        let urgency = self.expiry_analysis.urgency_score;
        if !unit_interval(urgency) {
            return Err(ArtifactError::deserialization(format!(
                "urgency_score {} outside [0, 1]",
                urgency
            )));
        }
        if !self.ingredient_vectors.is_empty()
            && self.ingredient_vectors.len() != self.normalized_items.len()
        {
            return Err(ArtifactError::deserialization(format!(
                "{} ingredient vectors for {} items",
                self.ingredient_vectors.len(),
                self.normalized_items.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Preferences
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreferenceArtifact {
    pub dietary_restrictions: BTreeSet<String>,
    pub allergens: BTreeSet<String>,
    /// Cuisine name → affinity score in [0, 1]
    pub cuisine_preferences: BTreeMap<String, f64>,
    pub preference_vector: Vec<f64>,
    /// Free-form provenance (interaction counts, skipped steps, ...)
    pub learning_data: serde_json::Value,
}

impl PreferenceArtifact {
    pub fn validate(&self) -> Result<()> {
        if let Some((cuisine, score)) = self
            .cuisine_preferences
            .iter()
            .find(|(_, score)| !unit_interval(**score))
        {
            return Err(ArtifactError::deserialization(format!(
                "cuisine score for '{}' is {} (outside [0, 1])",
                cuisine, score
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Recipes
// =============================================================================

/// A ranked recipe as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub recipe_id: String,
    pub title: String,
    pub rank_score: f64,
    pub cuisine: Option<String>,
    pub matched_ingredients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecipeArtifact {
    /// Sorted by `rank_score`, highest first
    pub ranked_recipes: Vec<RecipeSummary>,
    pub embeddings_index: BTreeMap<String, Vec<f64>>,
    pub context_metadata: BTreeMap<String, serde_json::Value>,
}

impl RecipeArtifact {
    /// Build an artifact, sorting the recipes so the ranking invariant holds.
    pub fn new(
        mut ranked_recipes: Vec<RecipeSummary>,
        embeddings_index: BTreeMap<String, Vec<f64>>,
        context_metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        ranked_recipes.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));
        Self {
            ranked_recipes,
            embeddings_index,
            context_metadata,
        }
    }

    /// True when scores never increase along the sequence.
    pub fn is_ranked(&self) -> bool {
        self.ranked_recipes
            .windows(2)
            .all(|w| w[0].rank_score >= w[1].rank_score)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_ranked() {
            return Err(ArtifactError::deserialization(
                "ranked_recipes not sorted by rank_score",
            ));
        }
        Ok(())
    }
}
