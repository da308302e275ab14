//! Terminal steps that build artifacts and write them to the cache.

use artifacts::{
    Artifact, ArtifactPayload, ArtifactType, CacheKey, PantryArtifact, PreferenceArtifact,
};
use async_trait::async_trait;
use cache::ArtifactCache;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::state::{PantryState, PreferenceState};
use crate::step_pipeline::{completed, skipped};
use crate::traits::{Persist, PersistOutcome, StepRecord};

pub struct PersistPantryStep {
    cache: ArtifactCache,
    ttl: Duration,
}

impl PersistPantryStep {
    pub fn new(cache: ArtifactCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl Persist<PantryState> for PersistPantryStep {
    fn name(&self) -> &str {
        "persist-artifact"
    }

    async fn persist(&self, state: PantryState, steps: &[StepRecord]) -> PersistOutcome {
        let now = self.cache.clock().now();
        let processing_data = json!({
            "raw_item_count": state.raw_items.len(),
            "item_count": state.items.len(),
            "completed_steps": completed(steps),
            "skipped_steps": skipped(steps),
            "computed_at": now.to_rfc3339(),
        });

        let payload = PantryArtifact {
            normalized_items: state.items,
            expiry_analysis: state.expiry,
            ingredient_vectors: state.vectors,
            processing_data,
        };
        let artifact = Artifact::new(
            state.user_id,
            ArtifactPayload::Pantry(payload),
            now,
            self.ttl.as_secs(),
        );
        store(&self.cache, ArtifactType::Pantry, artifact, self.ttl).await
    }
}

pub struct PersistPreferenceStep {
    cache: ArtifactCache,
    ttl: Duration,
}

impl PersistPreferenceStep {
    pub fn new(cache: ArtifactCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait]
impl Persist<PreferenceState> for PersistPreferenceStep {
    fn name(&self) -> &str {
        "persist-artifact"
    }

    async fn persist(&self, state: PreferenceState, steps: &[StepRecord]) -> PersistOutcome {
        let now = self.cache.clock().now();
        let signals = state.signals;
        let learning_data = json!({
            "interaction_count": state.interactions.len(),
            "rated_count": signals.rated_count,
            "mean_rating": signals.mean_rating,
            "inferred_restrictions": signals.inferred,
            "completed_steps": completed(steps),
            "skipped_steps": skipped(steps),
            "computed_at": now.to_rfc3339(),
        });

        let payload = PreferenceArtifact {
            dietary_restrictions: signals.restrictions,
            allergens: signals.allergens,
            cuisine_preferences: signals.cuisine_scores,
            preference_vector: state.vector,
            learning_data,
        };
        let artifact = Artifact::new(
            state.user_id,
            ArtifactPayload::Preferences(payload),
            now,
            self.ttl.as_secs(),
        );
        store(&self.cache, ArtifactType::Preferences, artifact, self.ttl).await
    }
}

async fn store(
    cache: &ArtifactCache,
    artifact_type: ArtifactType,
    artifact: Artifact,
    ttl: Duration,
) -> PersistOutcome {
    let key = CacheKey::new(artifact_type, artifact.owner_key);
    let stored = cache.put(&key, &artifact, ttl).await;
    if stored {
        debug!("Stored {} (ttl {:?})", key, ttl);
    } else {
        warn!("Failed to store {}", key);
    }
    PersistOutcome { artifact, stored }
}
