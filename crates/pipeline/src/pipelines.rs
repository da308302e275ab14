//! Assembly of the pantry and preference pipelines.

use artifacts::UserId;
use cache::ArtifactCache;
use sources::DataSource;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::state::{PantryState, PreferenceState};
use crate::step_pipeline::{PipelineReport, StepPipeline};
use crate::steps::{
    AnalyzeDietarySignalsStep, AnalyzeExpiryStep, BuildPreferenceVectorStep, ComputeVectorsStep,
    FetchInteractionsStep, FetchPantryStep, NormalizeStep, PersistPantryStep,
    PersistPreferenceStep,
};

pub fn pantry_pipeline(
    source: Arc<dyn DataSource>,
    cache: ArtifactCache,
    config: &PipelineConfig,
) -> StepPipeline<PantryState> {
    let clock = cache.clock().clone();
    StepPipeline::new(
        "pantry",
        PersistPantryStep::new(cache, config.pantry_ttl()),
        config.step_timeout(),
    )
    .add_step(FetchPantryStep::new(source))
    .add_step(NormalizeStep::new(config.max_pantry_items))
    .add_step(AnalyzeExpiryStep::new(clock))
    .add_step(ComputeVectorsStep::new(config.vector_dimensions))
}

pub fn preference_pipeline(
    source: Arc<dyn DataSource>,
    cache: ArtifactCache,
    config: &PipelineConfig,
) -> StepPipeline<PreferenceState> {
    StepPipeline::new(
        "preference",
        PersistPreferenceStep::new(cache, config.preference_ttl()),
        config.step_timeout(),
    )
    .add_step(FetchInteractionsStep::new(source))
    .add_step(AnalyzeDietarySignalsStep::new(config.min_inference_interactions))
    .add_step(BuildPreferenceVectorStep)
}

/// Both background pipelines, ready to run for any user.
pub struct PrecomputePipelines {
    pantry: StepPipeline<PantryState>,
    preference: StepPipeline<PreferenceState>,
}

impl PrecomputePipelines {
    pub fn new(source: Arc<dyn DataSource>, cache: ArtifactCache, config: &PipelineConfig) -> Self {
        Self {
            pantry: pantry_pipeline(source.clone(), cache.clone(), config),
            preference: preference_pipeline(source, cache, config),
        }
    }

    pub fn from_parts(
        pantry: StepPipeline<PantryState>,
        preference: StepPipeline<PreferenceState>,
    ) -> Self {
        Self { pantry, preference }
    }

    pub async fn refresh_pantry(&self, user_id: UserId) -> PipelineReport {
        self.pantry.run(user_id, PantryState::new(user_id)).await
    }

    pub async fn refresh_preferences(&self, user_id: UserId) -> PipelineReport {
        self.preference
            .run(user_id, PreferenceState::new(user_id))
            .await
    }

    /// Run both pipelines concurrently.
    pub async fn refresh_all(&self, user_id: UserId) -> (PipelineReport, PipelineReport) {
        tokio::join!(self.refresh_pantry(user_id), self.refresh_preferences(user_id))
    }
}
