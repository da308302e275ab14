//! Ranking engine seam.
//!
//! The ranking algorithm itself lives outside this crate. The foreground
//! path builds a `RankingRequest` from cached artifacts and hands it to
//! whatever `RankingEngine` was injected.

use artifacts::{PantryArtifact, PreferenceArtifact, RecipeSummary, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankingError {
    #[error("Ranking engine unavailable: {0}")]
    Unavailable(String),

    #[error("Ranking failed: {0}")]
    Failed(String),

    #[error("Ranking timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ranking engine panicked")]
    Panicked,
}

/// A recipe the caller wants ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeCandidate {
    pub recipe_id: String,
    pub title: String,
    pub cuisine: Option<String>,
    pub ingredients: Vec<String>,
    pub tags: Vec<String>,
}

impl RecipeCandidate {
    pub fn new<I, S>(recipe_id: impl Into<String>, title: impl Into<String>, ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipe_id: recipe_id.into(),
            title: title.into(),
            cuisine: None,
            ingredients: ingredients.into_iter().map(Into::into).collect(),
            tags: Vec::new(),
        }
    }

    pub fn with_cuisine(mut self, cuisine: impl Into<String>) -> Self {
        self.cuisine = Some(cuisine.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Everything the ranking engine knows about the user, taken from cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingContext {
    pub user_id: UserId,
    pub message: String,
    pub available_ingredients: Vec<String>,
    /// Expired / expiring-soon ingredients, soonest first
    pub priority_ingredients: Vec<String>,
    pub dietary_restrictions: BTreeSet<String>,
    pub allergens: BTreeSet<String>,
    pub cuisine_weights: BTreeMap<String, f64>,
    pub urgency_score: f64,
}

impl RankingContext {
    /// Build a context from the pantry and, if cached, the preferences.
    pub fn from_artifacts(
        user_id: UserId,
        message: &str,
        pantry: &PantryArtifact,
        preferences: Option<&PreferenceArtifact>,
    ) -> Self {
        let mut context = Self {
            user_id,
            message: message.to_string(),
            available_ingredients: pantry
                .normalized_items
                .iter()
                .map(|item| item.normalized_name.clone())
                .collect(),
            priority_ingredients: pantry.expiry_analysis.priority_items.clone(),
            urgency_score: pantry.expiry_analysis.urgency_score,
            ..Default::default()
        };
        if let Some(prefs) = preferences {
            context.dietary_restrictions = prefs.dietary_restrictions.clone();
            context.allergens = prefs.allergens.clone();
            context.cuisine_weights = prefs.cuisine_preferences.clone();
        }
        context
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRequest {
    pub context: RankingContext,
    pub candidates: Vec<RecipeCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingOutput {
    pub recipes: Vec<RecipeSummary>,
    /// Optional recipe embeddings, keyed by recipe id
    pub embeddings: BTreeMap<String, Vec<f64>>,
}

#[async_trait]
pub trait RankingEngine: Send + Sync {
    async fn rank(&self, request: &RankingRequest) -> Result<RankingOutput, RankingError>;
}

/// Ranks candidates by how much of each recipe the pantry covers.
///
/// Candidates containing an allergen, or missing a tag for one of the
/// user's dietary restrictions, are dropped. Score is ingredient coverage
/// plus a bonus for using priority ingredients and a cuisine affinity term.
#[derive(Debug, Clone, Default)]
pub struct IngredientOverlapRanker;

impl IngredientOverlapRanker {
    fn score(context: &RankingContext, candidate: &RecipeCandidate) -> Option<RecipeSummary> {
        let ingredients: Vec<String> = candidate
            .ingredients
            .iter()
            .map(|i| i.trim().to_lowercase())
            .collect();
        let tags: BTreeSet<String> = candidate.tags.iter().map(|t| t.trim().to_lowercase()).collect();

        if ingredients.iter().any(|i| context.allergens.contains(i)) {
            return None;
        }
        if !context.dietary_restrictions.iter().all(|r| tags.contains(r)) {
            return None;
        }

        let matched: Vec<String> = ingredients
            .iter()
            .filter(|i| context.available_ingredients.contains(i))
            .cloned()
            .collect();
        let coverage = if ingredients.is_empty() {
            0.0
        } else {
            matched.len() as f64 / ingredients.len() as f64
        };
        let priority_used = matched
            .iter()
            .filter(|i| context.priority_ingredients.contains(i))
            .count();
        let affinity = candidate
            .cuisine
            .as_ref()
            .and_then(|c| context.cuisine_weights.get(&c.trim().to_lowercase()))
            .copied()
            .unwrap_or(0.0);

        Some(RecipeSummary {
            recipe_id: candidate.recipe_id.clone(),
            title: candidate.title.clone(),
            rank_score: coverage + 0.25 * priority_used as f64 + 0.2 * affinity,
            cuisine: candidate.cuisine.clone(),
            matched_ingredients: matched,
        })
    }
}

#[async_trait]
impl RankingEngine for IngredientOverlapRanker {
    async fn rank(&self, request: &RankingRequest) -> Result<RankingOutput, RankingError> {
        let mut recipes: Vec<RecipeSummary> = request
            .candidates
            .iter()
            .filter_map(|c| Self::score(&request.context, c))
            .collect();
        recipes.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));
        Ok(RankingOutput {
            recipes,
            embeddings: BTreeMap::new(),
        })
    }
}
