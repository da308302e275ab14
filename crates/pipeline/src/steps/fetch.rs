//! Steps that read raw data from the system of record.

use async_trait::async_trait;
use sources::DataSource;
use std::sync::Arc;
use tracing::debug;

use crate::state::{PantryState, PreferenceState};
use crate::traits::{PipelineError, Step};

/// Loads the user's raw pantry items.
pub struct FetchPantryStep {
    source: Arc<dyn DataSource>,
}

impl FetchPantryStep {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Step<PantryState> for FetchPantryStep {
    fn name(&self) -> &str {
        "fetch-raw"
    }

    async fn execute(&self, state: &mut PantryState) -> Result<(), PipelineError> {
        let items = self.source.fetch_pantry_items(state.user_id).await?;
        debug!("User {} has {} raw pantry items", state.user_id, items.len());
        state.raw_items = items;
        Ok(())
    }
}

/// Loads the profile and interaction history together.
pub struct FetchInteractionsStep {
    source: Arc<dyn DataSource>,
}

impl FetchInteractionsStep {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Step<PreferenceState> for FetchInteractionsStep {
    fn name(&self) -> &str {
        "fetch-interactions"
    }

    async fn execute(&self, state: &mut PreferenceState) -> Result<(), PipelineError> {
        let (profile, interactions) = tokio::join!(
            self.source.fetch_profile(state.user_id),
            self.source.fetch_interactions(state.user_id)
        );
        let (profile, interactions) = (profile?, interactions?);
        debug!(
            "User {} has {} interactions",
            state.user_id,
            interactions.len()
        );
        state.profile = profile;
        state.interactions = interactions;
        Ok(())
    }
}
