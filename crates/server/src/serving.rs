//! Foreground serving path.
//!
//! Answers a query using only what is already cached. Nothing here waits
//! on background work, and no internal error reaches the caller: every
//! outcome is a well-formed `QueryResult`.

use artifacts::{
    is_word_token, Artifact, ArtifactPayload, ArtifactType, CacheKey, RecipeArtifact,
    RecipeSummary, UserId,
};
use cache::ArtifactCache;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServingConfig;
use crate::ranking::{
    RankingContext, RankingEngine, RankingError, RankingOutput, RankingRequest, RecipeCandidate,
};

const WARMING_MESSAGE: &str =
    "We're still getting to know your pantry. Try again in a moment.";
const DEGRADED_MESSAGE: &str =
    "Recommendations are temporarily unavailable. Please try again shortly.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub user_id: UserId,
    pub message: String,
    pub candidates: Vec<RecipeCandidate>,
    /// Caller-supplied cache context; derived from the query when absent
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeStatus {
    Served,
    /// No pantry artifact yet
    Warming,
    /// Ranking failed or timed out
    Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub elapsed_ms: u64,
    pub context: String,
    pub pantry_hit: bool,
    pub preferences_hit: bool,
    pub served_from_cache: bool,
    /// Artifact types a background refresh was started for
    pub refresh_scheduled: Vec<ArtifactType>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub status: ServeStatus,
    pub recipes: Vec<RecipeSummary>,
    pub message: Option<String>,
    pub diagnostics: Diagnostics,
}

/// Cache context for a request.
///
/// The caller's context wins when it is a valid word token. Otherwise it is
/// `q` followed by 16 hex chars of SHA-256 over the normalized message and
/// the sorted candidate ids, so structurally identical queries share a key.
pub fn derive_context(request: &QueryRequest) -> String {
    if let Some(context) = request.context.as_deref().filter(|c| is_word_token(c)) {
        return context.to_string();
    }

    let message = request
        .message
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut ids: Vec<&str> = request
        .candidates
        .iter()
        .map(|c| c.recipe_id.as_str())
        .collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(b"\n");
    hasher.update(ids.join(",").as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("q{}", &digest[..16])
}

/// Pantry and preference artifacts as read for one query.
#[derive(Debug, Clone, Default)]
pub struct CachedArtifacts {
    pub pantry: Option<Artifact>,
    pub preferences: Option<Artifact>,
}

impl CachedArtifacts {
    pub fn pantry_hit(&self) -> bool {
        self.pantry.is_some()
    }

    pub fn preferences_hit(&self) -> bool {
        self.preferences.is_some()
    }
}

pub struct ForegroundPath {
    cache: ArtifactCache,
    ranker: Arc<dyn RankingEngine>,
    config: ServingConfig,
}

impl ForegroundPath {
    pub fn new(cache: ArtifactCache, ranker: Arc<dyn RankingEngine>, config: ServingConfig) -> Self {
        Self {
            cache,
            ranker,
            config,
        }
    }

    /// Serve one query from cached artifacts.
    ///
    /// ## Algorithm
    /// 1. Read pantry and preferences concurrently
    /// 2. No pantry: return `Warming` without calling the ranker
    /// 3. Fresh recipe artifact for (user, context): serve it
    /// 4. Otherwise rank under a timeout and cache the result
    pub async fn serve(&self, request: &QueryRequest) -> QueryResult {
        let start = Instant::now();
        let artifacts = self.read_artifacts(request.user_id).await;
        self.respond(request, artifacts, start).await
    }

    /// Read the user's pantry and preferences concurrently.
    pub async fn read_artifacts(&self, user_id: UserId) -> CachedArtifacts {
        let pantry_key = CacheKey::new(ArtifactType::Pantry, user_id);
        let preferences_key = CacheKey::new(ArtifactType::Preferences, user_id);
        let (pantry, preferences) = tokio::join!(
            self.cache.get(&pantry_key),
            self.cache.get(&preferences_key)
        );
        CachedArtifacts {
            pantry,
            preferences,
        }
    }

    /// Steps 2-4 of `serve`, given artifacts already read. `start` is when
    /// the request began, for the elapsed time in diagnostics.
    pub async fn respond(
        &self,
        request: &QueryRequest,
        artifacts: CachedArtifacts,
        start: Instant,
    ) -> QueryResult {
        let user_id = request.user_id;
        let context = derive_context(request);
        let mut diagnostics = Diagnostics {
            context: context.clone(),
            pantry_hit: artifacts.pantry_hit(),
            preferences_hit: artifacts.preferences_hit(),
            ..Default::default()
        };
        let CachedArtifacts {
            pantry,
            preferences,
        } = artifacts;

        let Some(pantry) = pantry.as_ref().and_then(Artifact::as_pantry) else {
            info!("No pantry artifact for user {}, still warming", user_id);
            return finish(ServeStatus::Warming, Vec::new(), Some(WARMING_MESSAGE), diagnostics, start);
        };

        let recipe_key = match CacheKey::with_context(ArtifactType::Recipes, user_id, &context) {
            Ok(key) => key,
            Err(e) => {
                diagnostics.error = Some(e.to_string());
                return finish(ServeStatus::Degraded, Vec::new(), Some(DEGRADED_MESSAGE), diagnostics, start);
            }
        };

        if let Some(cached) = self.cache.get(&recipe_key).await {
            if let Some(recipes) = cached.as_recipes() {
                debug!("Serving {} from cache", recipe_key);
                diagnostics.served_from_cache = true;
                return finish(
                    ServeStatus::Served,
                    recipes.ranked_recipes.clone(),
                    None,
                    diagnostics,
                    start,
                );
            }
        }

        let ranking_context = RankingContext::from_artifacts(
            user_id,
            &request.message,
            pantry,
            preferences.as_ref().and_then(Artifact::as_preferences),
        );
        let ranking_request = RankingRequest {
            context: ranking_context,
            candidates: request.candidates.clone(),
        };

        match self.rank(ranking_request).await {
            Ok(output) => {
                let urgency = pantry.expiry_analysis.urgency_score;
                let artifact = self.recipe_artifact(user_id, &context, request, urgency, output);
                let recipes = artifact
                    .as_recipes()
                    .map(|r| r.ranked_recipes.clone())
                    .unwrap_or_default();
                if !self
                    .cache
                    .put(&recipe_key, &artifact, self.config.recipe_ttl())
                    .await
                {
                    warn!("Could not cache ranked recipes under {}", recipe_key);
                }
                finish(ServeStatus::Served, recipes, None, diagnostics, start)
            }
            Err(e) => {
                warn!("Ranking failed for user {}: {}", user_id, e);
                diagnostics.error = Some(e.to_string());
                finish(ServeStatus::Degraded, Vec::new(), Some(DEGRADED_MESSAGE), diagnostics, start)
            }
        }
    }

    /// Run the ranker on its own task so a panic or timeout turns into an
    /// error instead of unwinding through the request.
    async fn rank(
        &self,
        request: RankingRequest,
    ) -> Result<RankingOutput, RankingError> {
        let ranker = self.ranker.clone();
        let timeout = self.config.ranking_timeout();
        let mut handle = tokio::spawn(async move { ranker.rank(&request).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => Err(RankingError::Panicked),
            Ok(Err(join_error)) => Err(RankingError::Failed(join_error.to_string())),
            Err(_) => {
                handle.abort();
                Err(RankingError::Timeout(timeout))
            }
        }
    }

    fn recipe_artifact(
        &self,
        user_id: UserId,
        context: &str,
        request: &QueryRequest,
        urgency_score: f64,
        output: RankingOutput,
    ) -> Artifact {
        let mut metadata = BTreeMap::new();
        metadata.insert("context".to_string(), json!(context));
        metadata.insert("message".to_string(), json!(request.message));
        metadata.insert("candidate_count".to_string(), json!(request.candidates.len()));
        metadata.insert("urgency_score".to_string(), json!(urgency_score));

        Artifact::new(
            user_id,
            ArtifactPayload::Recipes(RecipeArtifact::new(output.recipes, output.embeddings, metadata)),
            self.cache.clock().now(),
            self.config.recipe_ttl_secs,
        )
    }
}

fn finish(
    status: ServeStatus,
    recipes: Vec<RecipeSummary>,
    message: Option<&str>,
    mut diagnostics: Diagnostics,
    start: Instant,
) -> QueryResult {
    diagnostics.elapsed_ms = start.elapsed().as_millis() as u64;
    QueryResult {
        status,
        recipes,
        message: message.map(str::to_string),
        diagnostics,
    }
}
