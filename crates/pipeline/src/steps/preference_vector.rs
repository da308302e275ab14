//! Fixed-layout preference vector.

use async_trait::async_trait;
use tracing::debug;

use crate::state::{DietarySignals, PreferenceState};
use crate::traits::{PipelineError, Step};

pub const KNOWN_CUISINES: [&str; 12] = [
    "italian",
    "mexican",
    "chinese",
    "japanese",
    "indian",
    "thai",
    "french",
    "mediterranean",
    "american",
    "korean",
    "middle eastern",
    "greek",
];

pub const KNOWN_DIETARY_TAGS: [&str; 8] = [
    "vegetarian",
    "vegan",
    "gluten-free",
    "dairy-free",
    "keto",
    "paleo",
    "low-carb",
    "pescatarian",
];

/// Interaction count at which engagement saturates.
const ENGAGEMENT_SATURATION: f64 = 50.0;

/// cuisines, dietary flags, mean rating, engagement
pub const PREFERENCE_VECTOR_LEN: usize = KNOWN_CUISINES.len() + KNOWN_DIETARY_TAGS.len() + 2;

/// Layout: one slot per known cuisine (its score, 0 when unseen), one per
/// known dietary tag (1 when restricted), mean rating / 5, engagement.
pub fn preference_vector(signals: &DietarySignals, interaction_count: usize) -> Vec<f64> {
    let mut vector = Vec::with_capacity(PREFERENCE_VECTOR_LEN);
    vector.extend(
        KNOWN_CUISINES
            .iter()
            .map(|c| signals.cuisine_scores.get(*c).copied().unwrap_or(0.0)),
    );
    vector.extend(KNOWN_DIETARY_TAGS.iter().map(|tag| {
        if signals.restrictions.contains(*tag) {
            1.0
        } else {
            0.0
        }
    }));
    vector.push((signals.mean_rating / 5.0).clamp(0.0, 1.0));
    vector.push((interaction_count as f64 / ENGAGEMENT_SATURATION).min(1.0));
    vector
}

pub struct BuildPreferenceVectorStep;

#[async_trait]
impl Step<PreferenceState> for BuildPreferenceVectorStep {
    fn name(&self) -> &str {
        "build-preference-vector"
    }

    async fn execute(&self, state: &mut PreferenceState) -> Result<(), PipelineError> {
        let vector = preference_vector(&state.signals, state.interactions.len());
        debug!("Built preference vector for user {}", state.user_id);
        state.vector = vector;
        Ok(())
    }
}
