//! Dietary and cuisine signal analysis.

use async_trait::async_trait;
use sources::Interaction;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::state::{DietarySignals, PreferenceState};
use crate::steps::normalize::normalize_name;
use crate::steps::preference_vector::KNOWN_DIETARY_TAGS;
use crate::traits::{PipelineError, Step};

/// Ratings at or above this count as positive.
pub const POSITIVE_RATING: f64 = 4.0;
const MAX_RATING: f64 = 5.0;

/// `0.7 × (avg_rating / 5) + 0.3 × (count / total)`, clamped to [0, 1].
pub fn cuisine_score(avg_rating: f64, count: usize, total: usize) -> f64 {
    let frequency = if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    };
    (0.7 * (avg_rating / MAX_RATING) + 0.3 * frequency).clamp(0.0, 1.0)
}

/// Score every cuisine seen in the history. `total` is the number of
/// interactions, rated or not; the average only covers rated ones.
pub fn cuisine_scores(interactions: &[Interaction]) -> BTreeMap<String, f64> {
    let mut per_cuisine: BTreeMap<String, (usize, Vec<f64>)> = BTreeMap::new();
    for interaction in interactions {
        let Some(cuisine) = interaction.cuisine.as_deref().map(normalize_name) else {
            continue;
        };
        if cuisine.is_empty() {
            continue;
        }
        let entry = per_cuisine.entry(cuisine).or_default();
        entry.0 += 1;
        if let Some(rating) = interaction.rating {
            entry.1.push(rating);
        }
    }

    let total = interactions.len();
    per_cuisine
        .into_iter()
        .map(|(cuisine, (count, ratings))| {
            let avg = if ratings.is_empty() {
                0.0
            } else {
                ratings.iter().sum::<f64>() / ratings.len() as f64
            };
            (cuisine, cuisine_score(avg, count, total))
        })
        .collect()
}

/// Known dietary tags present on every positively rated interaction, once
/// there are at least `min_interactions` of them.
pub fn infer_restrictions(interactions: &[Interaction], min_interactions: usize) -> BTreeSet<String> {
    let positive: Vec<BTreeSet<String>> = interactions
        .iter()
        .filter(|i| i.rating.is_some_and(|r| r >= POSITIVE_RATING))
        .map(|i| i.tags.iter().map(|t| normalize_name(t)).collect())
        .collect();

    if positive.is_empty() || positive.len() < min_interactions {
        return BTreeSet::new();
    }

    KNOWN_DIETARY_TAGS
        .iter()
        .filter(|tag| positive.iter().all(|tags| tags.contains(**tag)))
        .map(|tag| tag.to_string())
        .collect()
}

fn validate_ratings(interactions: &[Interaction]) -> Result<(), String> {
    match interactions
        .iter()
        .find(|i| i.rating.is_some_and(|r| !(1.0..=MAX_RATING).contains(&r)))
    {
        Some(bad) => Err(format!(
            "rating {:?} on recipe {} outside 1..=5",
            bad.rating, bad.recipe_id
        )),
        None => Ok(()),
    }
}

/// Combines explicit profile settings with signals learned from history.
pub struct AnalyzeDietarySignalsStep {
    min_inference_interactions: usize,
}

impl AnalyzeDietarySignalsStep {
    pub fn new(min_inference_interactions: usize) -> Self {
        Self {
            min_inference_interactions,
        }
    }
}

#[async_trait]
impl Step<PreferenceState> for AnalyzeDietarySignalsStep {
    fn name(&self) -> &str {
        "analyze-dietary-signals"
    }

    async fn execute(&self, state: &mut PreferenceState) -> Result<(), PipelineError> {
        validate_ratings(&state.interactions)
            .map_err(|reason| PipelineError::step_failure(self.name(), reason))?;

        let inferred = infer_restrictions(&state.interactions, self.min_inference_interactions);
        let mut restrictions: BTreeSet<String> = state
            .profile
            .dietary_restrictions
            .iter()
            .map(|r| normalize_name(r))
            .filter(|r| !r.is_empty())
            .collect();
        restrictions.extend(inferred.iter().cloned());

        let allergens = state
            .profile
            .allergens
            .iter()
            .map(|a| normalize_name(a))
            .filter(|a| !a.is_empty())
            .collect();

        let ratings: Vec<f64> = state.interactions.iter().filter_map(|i| i.rating).collect();
        let mean_rating = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().sum::<f64>() / ratings.len() as f64
        };

        let signals = DietarySignals {
            restrictions,
            allergens,
            inferred,
            cuisine_scores: cuisine_scores(&state.interactions),
            mean_rating,
            rated_count: ratings.len(),
        };
        debug!(
            "User {}: {} restrictions ({} inferred), {} cuisines",
            state.user_id,
            signals.restrictions.len(),
            signals.inferred.len(),
            signals.cuisine_scores.len()
        );
        state.signals = signals;
        Ok(())
    }
}
