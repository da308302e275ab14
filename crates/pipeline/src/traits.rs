//! Core traits for the precomputation pipelines.
//!
//! A pipeline is a short, linear list of `Step`s sharing one mutable state
//! value, closed by a `Persist` step that turns whatever state exists into
//! an artifact and writes it to the cache.

use artifacts::Artifact;
use async_trait::async_trait;
use serde::Serialize;
use sources::SourceError;
use thiserror::Error;

/// Status token handed from one step to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Proceed,
    Skip,
}

/// Why a step could not complete.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Step {step} failed: {reason}")]
    StepFailure { step: String, reason: String },

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),
}

impl PipelineError {
    pub fn step_failure(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepFailure {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

/// One stage of a pipeline.
///
/// ## Design Note
/// A step must only write its own stage of the state once all of its work
/// has succeeded. The runner may drop a step's future on timeout, and a
/// failed step has to leave its stage at the default value.
#[async_trait]
pub trait Step<S: Send>: Send + Sync {
    /// Name used in logs and reports (e.g. "analyze-expiry")
    fn name(&self) -> &str;

    async fn execute(&self, state: &mut S) -> Result<(), PipelineError>;
}

/// Status of one step after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

/// Artifact built by a terminal step and whether the cache accepted it.
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub artifact: Artifact,
    pub stored: bool,
}

/// Terminal step. Always runs, whatever happened upstream.
#[async_trait]
pub trait Persist<S: Send>: Send + Sync {
    fn name(&self) -> &str;

    /// Build an artifact from `state` and store it. `steps` tells which
    /// stages were skipped so the artifact can record its provenance.
    async fn persist(&self, state: S, steps: &[StepRecord]) -> PersistOutcome;
}
