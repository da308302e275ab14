//! The StepPipeline runs a linear list of steps followed by a terminal
//! persist step.
//!
//! This module provides the `StepPipeline` struct that chains steps
//! together using the builder pattern.

use artifacts::{Artifact, UserId};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::{Persist, Step, StepRecord, StepStatus};

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub pipeline: String,
    pub user_id: UserId,
    pub steps: Vec<StepRecord>,
    /// Every step proceeded
    pub complete: bool,
    /// The cache accepted the artifact
    pub persisted: bool,
    pub artifact: Artifact,
}

impl PipelineReport {
    pub fn skipped_steps(&self) -> Vec<&str> {
        skipped(&self.steps)
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            pipeline: self.pipeline.clone(),
            user_id: self.user_id,
            steps: self.steps.clone(),
            complete: self.complete,
            persisted: self.persisted,
        }
    }
}

/// `PipelineReport` without the artifact, for logs and status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub pipeline: String,
    pub user_id: UserId,
    pub steps: Vec<StepRecord>,
    pub complete: bool,
    pub persisted: bool,
}

pub(crate) fn skipped(steps: &[StepRecord]) -> Vec<&str> {
    with_status(steps, StepStatus::Skip)
}

pub(crate) fn completed(steps: &[StepRecord]) -> Vec<&str> {
    with_status(steps, StepStatus::Proceed)
}

fn with_status(steps: &[StepRecord], status: StepStatus) -> Vec<&str> {
    steps
        .iter()
        .filter(|s| s.status == status)
        .map(|s| s.name.as_str())
        .collect()
}

/// Chains steps into a precomputation pipeline.
///
/// ## Usage
/// ```ignore
/// let pipeline = StepPipeline::new("pantry", PersistPantryStep::new(cache, ttl), timeout)
///     .add_step(FetchPantryStep::new(source))
///     .add_step(NormalizeStep::new(500))
///     .add_step(AnalyzeExpiryStep::new(clock));
///
/// let report = pipeline.run(user_id, PantryState::new(user_id)).await;
/// ```
pub struct StepPipeline<S: Send> {
    name: String,
    steps: Vec<Box<dyn Step<S>>>,
    terminal: Box<dyn Persist<S>>,
    step_timeout: Duration,
}

impl<S: Send + 'static> StepPipeline<S> {
    pub fn new(
        name: impl Into<String>,
        terminal: impl Persist<S> + 'static,
        step_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            terminal: Box::new(terminal),
            step_timeout,
        }
    }

    /// Add a step to the pipeline (builder pattern).
    pub fn add_step(mut self, step: impl Step<S> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, then the terminal step.
    ///
    /// ## Algorithm
    /// 1. Each step receives the previous step's status
    /// 2. A `Skip` input short-circuits to `Skip` without running the step
    /// 3. A failure or timeout turns into `Skip` and is logged
    /// 4. The terminal step always runs, with whatever state exists
    pub async fn run(&self, user_id: UserId, mut state: S) -> PipelineReport {
        let mut status = StepStatus::Proceed;
        let mut records = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            status = self.advance(step.as_ref(), status, user_id, &mut state).await;
            records.push(StepRecord {
                name: step.name().to_string(),
                status,
            });
        }

        let complete = status == StepStatus::Proceed;
        if !complete {
            warn!(
                "{} pipeline for user {} persisting from incomplete data (skipped: {})",
                self.name,
                user_id,
                skipped(&records).join(", ")
            );
        }

        debug!("Running {} for user {}", self.terminal.name(), user_id);
        let outcome = self.terminal.persist(state, &records).await;
        info!(
            "{} pipeline for user {} finished (complete: {}, persisted: {})",
            self.name, user_id, complete, outcome.stored
        );

        PipelineReport {
            pipeline: self.name.clone(),
            user_id,
            steps: records,
            complete,
            persisted: outcome.stored,
            artifact: outcome.artifact,
        }
    }

    async fn advance(
        &self,
        step: &dyn Step<S>,
        input: StepStatus,
        user_id: UserId,
        state: &mut S,
    ) -> StepStatus {
        if input == StepStatus::Skip {
            debug!("Skipping step {} for user {}", step.name(), user_id);
            return StepStatus::Skip;
        }

        debug!("Running step {} for user {}", step.name(), user_id);
        match tokio::time::timeout(self.step_timeout, step.execute(state)).await {
            Ok(Ok(())) => StepStatus::Proceed,
            Ok(Err(e)) => {
                warn!("Step {} failed for user {}: {}", step.name(), user_id, e);
                StepStatus::Skip
            }
            Err(_) => {
                warn!(
                    "Step {} timed out after {:?} for user {}",
                    step.name(),
                    self.step_timeout,
                    user_id
                );
                StepStatus::Skip
            }
        }
    }
}
