//! # Pipeline Crate
//!
//! Background precomputation pipelines that turn raw user data into cached
//! artifacts.
//!
//! ## Architecture
//!
//! ```text
//! Step 1 ──► Step 2 ──► ... ──► Persist
//!   │ Proceed / Skip token handed forward
//!   └ failure or timeout ⇒ Skip, later steps short-circuit
//! ```
//!
//! The terminal persist step always runs, so a partially failed run still
//! produces an artifact with whatever stages completed.
//!
//! ## Pipelines
//! - **pantry**: fetch-raw → normalize → analyze-expiry → compute-vectors
//! - **preference**: fetch-interactions → analyze-dietary-signals →
//!   build-preference-vector

pub mod config;
pub mod pipelines;
pub mod state;
pub mod step_pipeline;
pub mod steps;
pub mod traits;

pub use config::PipelineConfig;
pub use pipelines::{pantry_pipeline, preference_pipeline, PrecomputePipelines};
pub use state::{DietarySignals, PantryState, PreferenceState};
pub use step_pipeline::{PipelineReport, ReportSummary, StepPipeline};
pub use traits::{Persist, PersistOutcome, PipelineError, Step, StepRecord, StepStatus};
