//! Integration tests for the orchestrator.
//!
//! These wire the real cache (file backend), pipelines and foreground path
//! together with test doubles for the data source and the ranking engine.

use artifacts::{ArtifactType, CacheKey, SystemClock, UserId};
use async_trait::async_trait;
use cache::{ArtifactCache, FileStore};
use pipeline::PrecomputePipelines;
use server::{
    EngineConfig, ForegroundPath, IngredientOverlapRanker, MutationKind, QueryRequest,
    RankingEngine, RankingError, RankingOutput, RankingRequest, RecipeCandidate,
    RecommendationOrchestrator, ServeStatus, ServingConfig, WarmOutcome,
};
use sources::{
    DataSource, InMemoryDataSource, Interaction, RawPantryItem, SourceResult, UserProfile,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{AlertSink, AlertType, Alerter, CacheMetrics, MemoryAlertSink, Outcome};

/// Wraps the in-memory source, panicking for one user and optionally
/// slowing every pantry fetch down.
struct FlakySource {
    inner: InMemoryDataSource,
    panic_for: Option<UserId>,
    delay: Duration,
}

#[async_trait]
impl DataSource for FlakySource {
    async fn fetch_pantry_items(&self, user_id: UserId) -> SourceResult<Vec<RawPantryItem>> {
        if self.panic_for == Some(user_id) {
            panic!("data source exploded for user {}", user_id);
        }
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_pantry_items(user_id).await
    }

    async fn fetch_interactions(&self, user_id: UserId) -> SourceResult<Vec<Interaction>> {
        self.inner.fetch_interactions(user_id).await
    }

    async fn fetch_profile(&self, user_id: UserId) -> SourceResult<UserProfile> {
        self.inner.fetch_profile(user_id).await
    }
}

/// Returns the pantry as it was when the first fetch began, after a lag.
/// Later fetches answer straight away.
struct LaggingSource {
    inner: Arc<InMemoryDataSource>,
    lag: Duration,
    first_fetch_started: AtomicBool,
}

impl LaggingSource {
    fn started(&self) -> bool {
        self.first_fetch_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for LaggingSource {
    async fn fetch_pantry_items(&self, user_id: UserId) -> SourceResult<Vec<RawPantryItem>> {
        let items = self.inner.fetch_pantry_items(user_id).await;
        if !self.first_fetch_started.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(self.lag).await;
        }
        items
    }

    async fn fetch_interactions(&self, user_id: UserId) -> SourceResult<Vec<Interaction>> {
        self.inner.fetch_interactions(user_id).await
    }

    async fn fetch_profile(&self, user_id: UserId) -> SourceResult<UserProfile> {
        self.inner.fetch_profile(user_id).await
    }
}

/// Counts interaction fetches, which only the preference pipeline makes.
struct CountingSource {
    inner: InMemoryDataSource,
    interaction_fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl DataSource for CountingSource {
    async fn fetch_pantry_items(&self, user_id: UserId) -> SourceResult<Vec<RawPantryItem>> {
        self.inner.fetch_pantry_items(user_id).await
    }

    async fn fetch_interactions(&self, user_id: UserId) -> SourceResult<Vec<Interaction>> {
        self.interaction_fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_interactions(user_id).await
    }

    async fn fetch_profile(&self, user_id: UserId) -> SourceResult<UserProfile> {
        self.inner.fetch_profile(user_id).await
    }
}

/// Notes how many interaction fetches had happened once ranking got going.
struct RecordingRanker {
    interaction_fetches: Arc<AtomicUsize>,
    seen_at_rank: Arc<AtomicUsize>,
}

#[async_trait]
impl RankingEngine for RecordingRanker {
    async fn rank(&self, _: &RankingRequest) -> Result<RankingOutput, RankingError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.seen_at_rank
            .store(self.interaction_fetches.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(RankingOutput::default())
    }
}

struct FailingRanker;

#[async_trait]
impl RankingEngine for FailingRanker {
    async fn rank(&self, _: &RankingRequest) -> Result<RankingOutput, RankingError> {
        Err(RankingError::Unavailable("model server down".into()))
    }
}

struct SlowRanker;

#[async_trait]
impl RankingEngine for SlowRanker {
    async fn rank(&self, _: &RankingRequest) -> Result<RankingOutput, RankingError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(RankingOutput::default())
    }
}

struct PanickingRanker;

#[async_trait]
impl RankingEngine for PanickingRanker {
    async fn rank(&self, _: &RankingRequest) -> Result<RankingOutput, RankingError> {
        panic!("ranker bug")
    }
}

struct Harness {
    orchestrator: RecommendationOrchestrator,
    _dir: tempfile::TempDir,
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.warming.batch_delay_ms = 10;
    config.serving.ranking_timeout_ms = 100;
    config
}

async fn harness(source: FlakySource, ranker: Arc<dyn RankingEngine>) -> Harness {
    harness_with(Arc::new(source), ranker, test_config(), None).await
}

async fn harness_with(
    source: Arc<dyn DataSource>,
    ranker: Arc<dyn RankingEngine>,
    config: EngineConfig,
    sink: Option<Arc<dyn AlertSink>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SystemClock);
    let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
    let alerter = Arc::new(Alerter::new(sink, clock.clone()));
    let metrics = Arc::new(CacheMetrics::new(config.metrics.clone(), alerter, clock.clone()));
    let cache = ArtifactCache::new(Arc::new(store), metrics, clock);

    let pipelines = PrecomputePipelines::new(source, cache.clone(), &config.pipelines);
    Harness {
        orchestrator: RecommendationOrchestrator::new(cache, pipelines, ranker, &config),
        _dir: dir,
    }
}

fn seeded_source() -> InMemoryDataSource {
    let source = InMemoryDataSource::new();
    source.replace_pantry(
        1,
        vec![
            RawPantryItem::new("Tomato", 3.0, "pcs"),
            RawPantryItem::new("Basil", 1.0, "bunch"),
            RawPantryItem::new("Spaghetti", 500.0, "g"),
        ],
    );
    source.insert_interaction(
        1,
        Interaction::rated("r-old", "italian", 5.0, chrono::Utc::now()),
    );
    source
}

fn flaky(inner: InMemoryDataSource) -> FlakySource {
    FlakySource {
        inner,
        panic_for: None,
        delay: Duration::ZERO,
    }
}

fn candidates() -> Vec<RecipeCandidate> {
    vec![
        RecipeCandidate::new("r1", "Pomodoro", ["spaghetti", "tomato", "basil"]).with_cuisine("italian"),
        RecipeCandidate::new("r2", "Omelette", ["egg", "butter"]),
    ]
}

async fn wait_until_ready(orchestrator: &RecommendationOrchestrator, user_id: UserId) {
    for _ in 0..200 {
        if orchestrator.get_status(user_id).await.is_ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("artifacts for user {} never became ready", user_id);
}

#[tokio::test]
async fn test_warm_batches_and_isolates_panics() {
    let inner = InMemoryDataSource::new();
    for user in 1..=25 {
        inner.insert_user(user);
    }
    let source = FlakySource {
        inner,
        panic_for: Some(7),
        delay: Duration::ZERO,
    };
    let h = harness(source, Arc::new(IngredientOverlapRanker)).await;

    let users: Vec<UserId> = (1..=25).collect();
    let report = h.orchestrator.warm(&users, "scheduled").await;

    assert_eq!(report.batches, vec![10, 10, 5]);
    assert_eq!(report.outcomes.len(), 25);
    assert!(matches!(report.outcomes[&7], WarmOutcome::Failed { .. }));
    assert_eq!(report.outcomes[&8], WarmOutcome::Succeeded);
    assert_eq!(report.succeeded(), 24);
    assert_eq!(report.failed(), 1);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_warm_pauses_between_batches() {
    let inner = InMemoryDataSource::new();
    for user in 1..=25 {
        inner.insert_user(user);
    }
    let mut config = test_config();
    config.warming.batch_delay_ms = 1_000;
    let h = harness_with(
        Arc::new(flaky(inner)),
        Arc::new(IngredientOverlapRanker),
        config,
        None,
    )
    .await;
    let users: Vec<UserId> = (1..=25).collect();

    let start = tokio::time::Instant::now();
    let report = h.orchestrator.warm(&users, "nightly").await;
    assert_eq!(report.batches, vec![10, 10, 5]);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(report.elapsed_ms >= 2_000);

    // One batch, no pause
    let start = tokio::time::Instant::now();
    let report = h.orchestrator.warm(&users[..10], "nightly").await;
    assert_eq!(report.batches, vec![10]);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cold_query_warms_then_serves() {
    let h = harness(flaky(seeded_source()), Arc::new(IngredientOverlapRanker)).await;

    let cold = h.orchestrator.submit_query(1, "dinner", candidates(), None).await;
    assert_eq!(cold.status, ServeStatus::Warming);
    assert!(cold.recipes.is_empty());
    assert!(cold.message.is_some());
    assert_eq!(
        cold.diagnostics.refresh_scheduled,
        vec![ArtifactType::Pantry, ArtifactType::Preferences]
    );

    wait_until_ready(&h.orchestrator, 1).await;

    let warm = h.orchestrator.submit_query(1, "dinner", candidates(), None).await;
    assert_eq!(warm.status, ServeStatus::Served);
    assert!(!warm.diagnostics.served_from_cache);
    assert!(warm.diagnostics.refresh_scheduled.is_empty());
    assert_eq!(warm.recipes[0].recipe_id, "r1");

    let repeat = h
        .orchestrator
        .submit_query(1, "  DINNER ", candidates(), None)
        .await;
    assert_eq!(repeat.status, ServeStatus::Served);
    assert!(repeat.diagnostics.served_from_cache);
    let ids = |r: &server::QueryResult| -> Vec<String> {
        r.recipes.iter().map(|s| s.recipe_id.clone()).collect()
    };
    assert_eq!(ids(&repeat), ids(&warm));
}

#[tokio::test]
async fn test_foreground_path_serves_on_its_own() {
    let h = harness(flaky(seeded_source()), Arc::new(IngredientOverlapRanker)).await;
    h.orchestrator.warm(&[1], "test").await;
    let foreground = ForegroundPath::new(
        h.orchestrator.cache().clone(),
        Arc::new(IngredientOverlapRanker),
        ServingConfig::default(),
    );

    let mut request = QueryRequest {
        user_id: 1,
        message: "dinner".into(),
        candidates: candidates(),
        context: Some("direct".into()),
    };
    let served = foreground.serve(&request).await;
    assert_eq!(served.status, ServeStatus::Served);
    assert_eq!(served.diagnostics.context, "direct");
    assert_eq!(served.recipes[0].recipe_id, "r1");
    assert!(served.diagnostics.refresh_scheduled.is_empty());

    request.user_id = 2;
    let cold = foreground.serve(&request).await;
    assert_eq!(cold.status, ServeStatus::Warming);
    assert!(!cold.diagnostics.pantry_hit);
}

#[tokio::test]
async fn test_ranking_failures_degrade() {
    for ranker in [
        Arc::new(FailingRanker) as Arc<dyn RankingEngine>,
        Arc::new(SlowRanker),
        Arc::new(PanickingRanker),
    ] {
        let h = harness(flaky(seeded_source()), ranker).await;
        h.orchestrator.warm(&[1], "test").await;

        let result = h.orchestrator.submit_query(1, "lunch", candidates(), None).await;
        assert_eq!(result.status, ServeStatus::Degraded);
        assert!(result.recipes.is_empty());
        assert!(result.diagnostics.pantry_hit);
        assert!(result.diagnostics.error.is_some());
    }
}

#[tokio::test]
async fn test_pantry_edit_invalidates_and_refreshes() {
    let h = harness(flaky(seeded_source()), Arc::new(IngredientOverlapRanker)).await;
    h.orchestrator.warm(&[1], "test").await;

    let served = h
        .orchestrator
        .submit_query(1, "dinner", candidates(), Some("weeknight".into()))
        .await;
    assert_eq!(served.status, ServeStatus::Served);

    // pantry:1 and recipes:1:weeknight
    let removed = h.orchestrator.notify_mutation(1, MutationKind::PantryEdit).await;
    assert_eq!(removed, 2);

    let recipe_key = CacheKey::with_context(ArtifactType::Recipes, 1, "weeknight").unwrap();
    assert!(h.orchestrator.cache().peek(&recipe_key).await.is_none());

    wait_until_ready(&h.orchestrator, 1).await;
    let status = h.orchestrator.get_status(1).await;
    let pantry = status.artifact(ArtifactType::Pantry).unwrap();
    assert!(pantry.fresh);
    assert!(pantry.ttl_remaining_secs.unwrap() > 3_500);
}

#[tokio::test]
async fn test_mutation_refresh_lands_after_older_refresh() {
    let inner = Arc::new(InMemoryDataSource::new());
    inner.replace_pantry(
        1,
        vec![
            RawPantryItem::new("Old A", 1.0, "pcs"),
            RawPantryItem::new("Old B", 1.0, "pcs"),
            RawPantryItem::new("Old C", 1.0, "pcs"),
        ],
    );
    let source = Arc::new(LaggingSource {
        inner: inner.clone(),
        lag: Duration::from_millis(400),
        first_fetch_started: AtomicBool::new(false),
    });
    let h = harness_with(
        source.clone(),
        Arc::new(IngredientOverlapRanker),
        test_config(),
        None,
    )
    .await;

    let cold = h.orchestrator.submit_query(1, "dinner", candidates(), None).await;
    assert_eq!(cold.status, ServeStatus::Warming);
    while !source.started() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The query refresh now holds the old pantry
    inner.replace_pantry(1, vec![RawPantryItem::new("New Only", 1.0, "pcs")]);
    h.orchestrator.notify_mutation(1, MutationKind::PantryEdit).await;

    for _ in 0..300 {
        if h.orchestrator.in_flight_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.orchestrator.in_flight_count(), 0);

    let cached = h
        .orchestrator
        .cache()
        .peek(&CacheKey::new(ArtifactType::Pantry, 1))
        .await
        .expect("pantry refreshed");
    let names: Vec<_> = cached
        .as_pantry()
        .unwrap()
        .normalized_items
        .iter()
        .map(|item| item.normalized_name.clone())
        .collect();
    assert_eq!(names, vec!["new only"]);
}

#[tokio::test]
async fn test_status_views_do_not_reset_error_run() {
    let sink = Arc::new(MemoryAlertSink::new());
    let h = harness_with(
        Arc::new(flaky(seeded_source())),
        Arc::new(IngredientOverlapRanker),
        test_config(),
        Some(sink.clone()),
    )
    .await;
    h.orchestrator.warm(&[1], "test").await;

    let metrics = h.orchestrator.cache().metrics().clone();
    let threshold = metrics.config().error_threshold;
    for _ in 0..threshold - 1 {
        metrics.record_outcome(Outcome::Error, Some(ArtifactType::Pantry));
    }

    assert!(h.orchestrator.get_status(1).await.is_ready());
    let stats = h.orchestrator.get_system_stats();
    assert!(stats.store_healthy);
    assert_eq!(stats.metrics.consecutive_errors, threshold - 1);

    metrics.record_outcome(Outcome::Error, Some(ArtifactType::Pantry));
    assert!(metrics.check_error_threshold());
    assert_eq!(sink.count_of(AlertType::ErrorThresholdExceeded), 1);
}

#[tokio::test]
async fn test_missing_artifact_refresh_starts_before_ranking() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let source = CountingSource {
        inner: seeded_source(),
        interaction_fetches: fetches.clone(),
    };
    let ranker = RecordingRanker {
        interaction_fetches: fetches.clone(),
        seen_at_rank: seen.clone(),
    };
    let h = harness_with(Arc::new(source), Arc::new(ranker), test_config(), None).await;
    h.orchestrator.warm(&[1], "test").await;
    h.orchestrator
        .cache()
        .delete(&CacheKey::new(ArtifactType::Preferences, 1))
        .await;
    let before = fetches.load(Ordering::SeqCst);

    let result = h.orchestrator.submit_query(1, "lunch", candidates(), None).await;
    assert_eq!(result.status, ServeStatus::Served);
    assert_eq!(result.diagnostics.refresh_scheduled, vec![ArtifactType::Preferences]);
    assert!(seen.load(Ordering::SeqCst) > before);
}

#[tokio::test]
async fn test_query_refreshes_are_deduplicated() {
    let source = FlakySource {
        inner: seeded_source(),
        panic_for: None,
        delay: Duration::from_millis(300),
    };
    let h = harness(source, Arc::new(IngredientOverlapRanker)).await;

    let first = h.orchestrator.submit_query(1, "a", candidates(), None).await;
    let second = h.orchestrator.submit_query(1, "b", candidates(), None).await;

    assert!(first.diagnostics.refresh_scheduled.contains(&ArtifactType::Pantry));
    assert!(!second.diagnostics.refresh_scheduled.contains(&ArtifactType::Pantry));

    let status = h.orchestrator.get_status(1).await;
    assert!(status.artifact(ArtifactType::Pantry).unwrap().refresh_in_flight);

    // Mutation refreshes are never deduplicated
    h.orchestrator
        .notify_mutation(1, MutationKind::PantryEdit)
        .await;
    assert!(h.orchestrator.in_flight_count() >= 2);

    wait_until_ready(&h.orchestrator, 1).await;
}

#[tokio::test]
async fn test_system_stats() {
    let h = harness(flaky(seeded_source()), Arc::new(IngredientOverlapRanker)).await;
    h.orchestrator.warm(&[1], "test").await;
    h.orchestrator.submit_query(1, "dinner", candidates(), None).await;

    let stats = h.orchestrator.get_system_stats();
    assert_eq!(stats.backend, "file");
    assert!(stats.store_healthy);
    assert_eq!(stats.metrics.total_errors, 0);
    assert!(stats.metrics.per_type["pantry"].hits >= 1);
}
