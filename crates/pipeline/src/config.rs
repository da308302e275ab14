//! Pipeline settings (`[pipelines]` section of the engine config).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pantry_ttl_secs: u64,
    pub preference_ttl_secs: u64,
    /// Upper bound for a single step, including data source calls
    pub step_timeout_ms: u64,
    /// Items beyond this count are dropped during normalization
    pub max_pantry_items: usize,
    /// Length of each hashed ingredient vector
    pub vector_dimensions: usize,
    /// Positively rated interactions needed before tags are inferred
    pub min_inference_interactions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pantry_ttl_secs: 3_600,
            preference_ttl_secs: 86_400,
            step_timeout_ms: 5_000,
            max_pantry_items: 500,
            vector_dimensions: 32,
            min_inference_interactions: 3,
        }
    }
}

impl PipelineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn pantry_ttl(&self) -> Duration {
        Duration::from_secs(self.pantry_ttl_secs)
    }

    pub fn preference_ttl(&self) -> Duration {
        Duration::from_secs(self.preference_ttl_secs)
    }
}
