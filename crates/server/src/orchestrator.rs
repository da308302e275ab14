//! # Recommendation Orchestrator
//!
//! Coordinates the foreground path with the background pipelines:
//! 1. Serve each query from cache, never waiting on a refresh
//! 2. Schedule refreshes for artifacts a query found missing
//! 3. Invalidate and eagerly refresh artifacts after user mutations
//! 4. Warm batches of users with bounded concurrency
//! 5. Report per-user status and system-wide stats
//!
//! Background refreshes are plain `tokio::spawn` tasks. The orchestrator
//! keeps no handle to them beyond an in-flight counter per (user, type).
//! Runs for the same (user, type) take turns on a refresh lane, so the last
//! run to start is also the last to persist.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use artifacts::{ArtifactType, CacheKey, Clock, Freshness, SystemClock, UserId};
use cache::{connect_store, ArtifactCache};
use pipeline::{PipelineReport, PrecomputePipelines};
use sources::DataSource;
use telemetry::{AlertSink, Alerter, CacheMetrics, HealthReport, MetricsSnapshot};

use crate::config::{EngineConfig, WarmingConfig};
use crate::ranking::{RankingEngine, RecipeCandidate};
use crate::serving::{ForegroundPath, QueryRequest, QueryResult};

/// User-side changes that invalidate cached artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    PantryEdit,
    RatingSubmitted,
    DietaryRestrictionChanged,
}

impl MutationKind {
    /// Artifact types made stale by this mutation. Recipes always are,
    /// since they are ranked from the other two.
    pub fn affected_types(&self) -> &'static [ArtifactType] {
        match self {
            MutationKind::PantryEdit => &[ArtifactType::Pantry, ArtifactType::Recipes],
            MutationKind::RatingSubmitted | MutationKind::DietaryRestrictionChanged => {
                &[ArtifactType::Preferences, ArtifactType::Recipes]
            }
        }
    }
}

/// Which user artifacts a read found fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactPresence {
    pub pantry: bool,
    pub preferences: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WarmOutcome {
    /// Both pipelines ran every step and persisted
    Succeeded,
    /// Artifacts persisted but some steps were skipped
    Partial { skipped_steps: Vec<String> },
    Failed { reason: String },
}

impl WarmOutcome {
    fn from_reports(pantry: &PipelineReport, preferences: &PipelineReport) -> Self {
        if !pantry.persisted || !preferences.persisted {
            return WarmOutcome::Failed {
                reason: "artifact could not be stored".to_string(),
            };
        }
        let skipped_steps: Vec<String> = [pantry, preferences]
            .iter()
            .flat_map(|r| {
                r.skipped_steps()
                    .into_iter()
                    .map(move |step| format!("{}/{}", r.pipeline, step))
            })
            .collect();
        if skipped_steps.is_empty() {
            WarmOutcome::Succeeded
        } else {
            WarmOutcome::Partial { skipped_steps }
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, WarmOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub reason: String,
    /// Users per batch, in order
    pub batches: Vec<usize>,
    pub outcomes: BTreeMap<UserId, WarmOutcome>,
    pub elapsed_ms: u64,
}

impl WarmReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactStatus {
    pub artifact_type: ArtifactType,
    pub present: bool,
    pub fresh: bool,
    pub age_secs: Option<i64>,
    pub ttl_remaining_secs: Option<i64>,
    pub refresh_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStatus {
    pub user_id: UserId,
    pub artifacts: Vec<ArtifactStatus>,
}

impl UserStatus {
    pub fn artifact(&self, artifact_type: ArtifactType) -> Option<&ArtifactStatus> {
        self.artifacts
            .iter()
            .find(|a| a.artifact_type == artifact_type)
    }

    pub fn is_ready(&self) -> bool {
        self.artifacts.iter().all(|a| a.fresh)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub backend: String,
    pub store_healthy: bool,
    pub metrics: MetricsSnapshot,
    pub in_flight_refreshes: usize,
}

type RefreshKey = (UserId, ArtifactType);

type InFlight = Arc<Mutex<HashMap<RefreshKey, usize>>>;

/// Counts one running refresh; the count drops when the guard does, even
/// if the refresh task panics.
struct InFlightGuard {
    in_flight: InFlight,
    key: (UserId, ArtifactType),
}

impl InFlightGuard {
    /// Register a refresh. With `dedup`, returns `None` when one is
    /// already running for the same (user, type).
    fn acquire(in_flight: &InFlight, key: (UserId, ArtifactType), dedup: bool) -> Option<Self> {
        let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let count = map.entry(key).or_insert(0);
        if dedup && *count > 0 {
            return None;
        }
        *count += 1;
        Some(Self {
            in_flight: in_flight.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// One async lock per (user, type). A pipeline run holds its lane from
/// fetch to persist, so a refresh that read the source before a mutation
/// cannot persist after the refresh scheduled by that mutation.
#[derive(Clone, Default)]
struct RefreshLanes {
    lanes: Arc<Mutex<HashMap<RefreshKey, Arc<AsyncMutex<()>>>>>,
}

impl RefreshLanes {
    fn lane(&self, key: RefreshKey) -> Arc<AsyncMutex<()>> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    /// Give back a lane, forgetting it when no other run holds or waits on it.
    fn release(&self, key: RefreshKey, lane: Arc<AsyncMutex<()>>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lane);
        if lanes.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            lanes.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Main orchestrator tying cache, pipelines and foreground path together
#[derive(Clone)]
pub struct RecommendationOrchestrator {
    cache: ArtifactCache,
    pipelines: Arc<PrecomputePipelines>,
    foreground: Arc<ForegroundPath>,
    warming: WarmingConfig,
    in_flight: InFlight,
    lanes: RefreshLanes,
}

impl RecommendationOrchestrator {
    pub fn new(
        cache: ArtifactCache,
        pipelines: PrecomputePipelines,
        ranker: Arc<dyn RankingEngine>,
        config: &EngineConfig,
    ) -> Self {
        let foreground = ForegroundPath::new(cache.clone(), ranker, config.serving.clone());
        Self {
            cache,
            pipelines: Arc::new(pipelines),
            foreground: Arc::new(foreground),
            warming: config.warming.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            lanes: RefreshLanes::default(),
        }
    }

    /// Build every component from configuration.
    ///
    /// Falls back to the file store when the configured backend is down;
    /// only fails when no store at all can be opened.
    pub async fn from_config(
        config: &EngineConfig,
        source: Arc<dyn DataSource>,
        ranker: Arc<dyn RankingEngine>,
        alert_sink: Option<Arc<dyn AlertSink>>,
    ) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let alerter = Arc::new(Alerter::new(alert_sink, clock.clone()));
        let backend = connect_store(&config.cache, clock.clone(), &alerter)
            .await
            .context("Failed to open a cache store")?;
        let metrics = Arc::new(CacheMetrics::new(config.metrics.clone(), alerter, clock.clone()));
        let cache = ArtifactCache::new(backend, metrics, clock);
        info!("Cache ready on {} backend", cache.backend_name());

        let pipelines = PrecomputePipelines::new(source, cache.clone(), &config.pipelines);
        Ok(Self::new(cache, pipelines, ranker, config))
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Answer a query from cache, scheduling refreshes for anything missing
    /// before ranking starts.
    pub async fn submit_query(
        &self,
        user_id: UserId,
        message: impl Into<String>,
        candidates: Vec<RecipeCandidate>,
        context: Option<String>,
    ) -> QueryResult {
        let request = QueryRequest {
            user_id,
            message: message.into(),
            candidates,
            context,
        };
        let start = Instant::now();
        let artifacts = self.foreground.read_artifacts(user_id).await;
        let presence = ArtifactPresence {
            pantry: artifacts.pantry_hit(),
            preferences: artifacts.preferences_hit(),
        };
        let scheduled = self.on_query(user_id, presence);

        let mut result = self.foreground.respond(&request, artifacts, start).await;
        result.diagnostics.refresh_scheduled = scheduled;

        info!(
            "Query for user {} answered {:?} in {}ms",
            user_id, result.status, result.diagnostics.elapsed_ms
        );
        result
    }

    /// Schedule a background refresh for every artifact the query found
    /// missing. Never waits; returns the types a refresh was started for.
    pub fn on_query(&self, user_id: UserId, presence: ArtifactPresence) -> Vec<ArtifactType> {
        let mut scheduled = Vec::new();
        for (artifact_type, present) in [
            (ArtifactType::Pantry, presence.pantry),
            (ArtifactType::Preferences, presence.preferences),
        ] {
            if !present && self.schedule_refresh(user_id, artifact_type, true) {
                scheduled.push(artifact_type);
            }
        }
        scheduled
    }

    /// Invalidate what `kind` affects, then start an eager refresh.
    ///
    /// Returns the number of cache entries removed. A reader right after
    /// this call may miss until the refresh lands. The eager refresh queues
    /// behind any run already in flight for the same type and persists last.
    pub async fn notify_mutation(&self, user_id: UserId, kind: MutationKind) -> u64 {
        let mut removed = 0;
        for artifact_type in kind.affected_types() {
            removed += self.invalidate(user_id, *artifact_type).await;
        }
        info!(
            "{:?} for user {} invalidated {} entries",
            kind, user_id, removed
        );

        for artifact_type in kind.affected_types() {
            if *artifact_type != ArtifactType::Recipes {
                self.schedule_refresh(user_id, *artifact_type, false);
            }
        }
        removed
    }

    async fn invalidate(&self, user_id: UserId, artifact_type: ArtifactType) -> u64 {
        let mut removed = self
            .cache
            .delete(&CacheKey::new(artifact_type, user_id))
            .await;
        if artifact_type == ArtifactType::Recipes {
            removed += self
                .cache
                .delete_matching(&CacheKey::context_pattern(artifact_type, user_id))
                .await;
        }
        removed
    }

    /// Spawn a pipeline run for one artifact type. Returns false when
    /// deduplicated or when the type has no background pipeline.
    fn schedule_refresh(&self, user_id: UserId, artifact_type: ArtifactType, dedup: bool) -> bool {
        if artifact_type == ArtifactType::Recipes {
            return false;
        }
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, (user_id, artifact_type), dedup)
        else {
            debug!(
                "Refresh of {} for user {} already in flight",
                artifact_type, user_id
            );
            return false;
        };

        let pipelines = self.pipelines.clone();
        let lanes = self.lanes.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let key = (user_id, artifact_type);
            let lane = lanes.lane(key);
            let report = {
                let _turn = lane.lock().await;
                match artifact_type {
                    ArtifactType::Pantry => pipelines.refresh_pantry(user_id).await,
                    _ => pipelines.refresh_preferences(user_id).await,
                }
            };
            lanes.release(key, lane);
            debug!("Background refresh finished: {:?}", report.summary());
        });
        debug!("Scheduled {} refresh for user {}", artifact_type, user_id);
        true
    }

    /// Refresh both artifacts for each user, in batches.
    ///
    /// Users in a batch run concurrently; batches are separated by the
    /// configured delay. A failing or panicking user only affects its own
    /// outcome.
    pub async fn warm(&self, user_ids: &[UserId], reason: &str) -> WarmReport {
        let start = Instant::now();
        let batch_size = self.warming.batch_size.max(1);
        let mut batches = Vec::new();
        let mut outcomes = BTreeMap::new();

        info!(
            "Warming {} users ({}) in batches of {}",
            user_ids.len(),
            reason,
            batch_size
        );

        for (index, batch) in user_ids.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.warming.batch_delay()).await;
            }

            let handles: Vec<(UserId, JoinHandle<(PipelineReport, PipelineReport)>)> = batch
                .iter()
                .map(|&user_id| (user_id, self.spawn_warm(user_id)))
                .collect();

            for (user_id, handle) in handles {
                let outcome = match handle.await {
                    Ok((pantry, preferences)) => WarmOutcome::from_reports(&pantry, &preferences),
                    Err(e) => {
                        error!("Warming user {} failed: {}", user_id, e);
                        WarmOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                outcomes.insert(user_id, outcome);
            }

            debug!("Warm batch {} done ({} users)", index + 1, batch.len());
            batches.push(batch.len());
        }

        let report = WarmReport {
            reason: reason.to_string(),
            batches,
            outcomes,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Warming ({}) finished: {} succeeded, {} failed in {}ms",
            reason,
            report.succeeded(),
            report.failed(),
            report.elapsed_ms
        );
        report
    }

    fn spawn_warm(&self, user_id: UserId) -> JoinHandle<(PipelineReport, PipelineReport)> {
        let pipelines = self.pipelines.clone();
        let lanes = self.lanes.clone();
        let guards = [ArtifactType::Pantry, ArtifactType::Preferences]
            .map(|t| InFlightGuard::acquire(&self.in_flight, (user_id, t), false));
        tokio::spawn(async move {
            let _guards = guards;
            // Fixed order; single-type refreshes never hold two lanes
            let pantry_key = (user_id, ArtifactType::Pantry);
            let preferences_key = (user_id, ArtifactType::Preferences);
            let pantry_lane = lanes.lane(pantry_key);
            let preferences_lane = lanes.lane(preferences_key);
            let reports = {
                let _pantry_turn = pantry_lane.lock().await;
                let _preferences_turn = preferences_lane.lock().await;
                pipelines.refresh_all(user_id).await
            };
            lanes.release(pantry_key, pantry_lane);
            lanes.release(preferences_key, preferences_lane);
            reports
        })
    }

    /// Freshness of a user's pantry and preference artifacts.
    pub async fn get_status(&self, user_id: UserId) -> UserStatus {
        let now = self.cache.clock().now();
        let pantry_key = CacheKey::new(ArtifactType::Pantry, user_id);
        let preferences_key = CacheKey::new(ArtifactType::Preferences, user_id);
        let (pantry, preferences) = tokio::join!(
            self.cache.peek(&pantry_key),
            self.cache.peek(&preferences_key)
        );

        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let artifacts = [
            (ArtifactType::Pantry, pantry),
            (ArtifactType::Preferences, preferences),
        ]
        .into_iter()
        .map(|(artifact_type, artifact)| ArtifactStatus {
            artifact_type,
            present: artifact.is_some(),
            fresh: artifact.as_ref().is_some_and(|a| a.is_fresh(now)),
            age_secs: artifact.as_ref().map(|a| a.age(now).num_seconds()),
            ttl_remaining_secs: artifact
                .as_ref()
                .map(|a| (a.expires_at() - now).num_seconds().max(0)),
            refresh_in_flight: in_flight.contains_key(&(user_id, artifact_type)),
        })
        .collect();

        UserStatus { user_id, artifacts }
    }

    /// Read-only snapshot. Store health is the last result recorded by the
    /// health monitor; this call never contacts the store.
    pub fn get_system_stats(&self) -> SystemStats {
        SystemStats {
            backend: self.cache.backend_name().to_string(),
            store_healthy: self.cache.last_known_healthy(),
            metrics: self.cache.metrics().compute_stats(),
            in_flight_refreshes: self.in_flight_count(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Probe the store and evaluate metric thresholds on a fixed interval.
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let interval = Duration::from_secs(
            cache.metrics().config().health_check_interval_secs.max(1),
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !cache.health_check().await {
                    warn!("Cache store {} is unhealthy", cache.backend_name());
                }
                if let Some(report) = cache.metrics().periodic_health_check() {
                    log_health(&report);
                }
            }
        })
    }
}

fn log_health(report: &HealthReport) {
    if report.is_healthy() {
        debug!("Cache health check passed at {}", report.checked_at);
    } else {
        warn!(
            "Cache health check found {} issues at {}",
            report.issues.len(),
            report.checked_at
        );
    }
}
