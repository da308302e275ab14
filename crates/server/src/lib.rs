//! Server crate for the pantry recommendation engine.
//!
//! This crate contains the foreground serving path, the ranking engine
//! seam and the orchestrator that coordinates them with the background
//! pipelines.

pub mod config;
pub mod orchestrator;
pub mod ranking;
pub mod serving;

pub use config::{ConfigError, EngineConfig, ServingConfig, WarmingConfig};
pub use orchestrator::{
    ArtifactPresence, ArtifactStatus, MutationKind, RecommendationOrchestrator, SystemStats,
    UserStatus, WarmOutcome, WarmReport,
};
pub use ranking::{
    IngredientOverlapRanker, RankingContext, RankingEngine, RankingError, RankingOutput,
    RankingRequest, RecipeCandidate,
};
pub use serving::{
    derive_context, CachedArtifacts, Diagnostics, ForegroundPath, QueryRequest, QueryResult,
    ServeStatus,
};
