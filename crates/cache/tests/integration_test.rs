//! Integration tests for the artifact cache.
//!
//! These run `ArtifactCache` against the real file backend (and a backend
//! that always fails) to check freshness, corruption handling and the
//! metrics/alerting side effects together.

use artifacts::{
    Artifact, ArtifactPayload, ArtifactType, CacheKey, Clock, ManualClock, PantryArtifact,
    PreferenceArtifact, RecipeArtifact,
};
use async_trait::async_trait;
use cache::{ArtifactCache, CacheBackend, FileStore, StoreError, StoreResult};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{AlertType, Alerter, CacheMetrics, MemoryAlertSink, MetricsConfig};

struct Harness {
    cache: ArtifactCache,
    clock: Arc<ManualClock>,
    sink: Arc<MemoryAlertSink>,
    _dir: tempfile::TempDir,
}

fn metrics_for(clock: Arc<ManualClock>) -> (Arc<CacheMetrics>, Arc<MemoryAlertSink>) {
    let sink = Arc::new(MemoryAlertSink::new());
    let alerter = Arc::new(Alerter::new(Some(sink.clone()), clock.clone()));
    (
        Arc::new(CacheMetrics::new(MetricsConfig::default(), alerter, clock)),
        sink,
    )
}

async fn file_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
    let (metrics, sink) = metrics_for(clock.clone());
    Harness {
        cache: ArtifactCache::new(Arc::new(store), metrics, clock.clone()),
        clock,
        sink,
        _dir: dir,
    }
}

fn pantry_artifact(owner: u64, clock: &ManualClock, ttl: u64) -> Artifact {
    Artifact::new(
        owner,
        ArtifactPayload::Pantry(PantryArtifact::default()),
        clock.now(),
        ttl,
    )
}

fn recipe_artifact(owner: u64, clock: &ManualClock, ttl: u64) -> Artifact {
    Artifact::new(
        owner,
        ArtifactPayload::Recipes(RecipeArtifact::default()),
        clock.now(),
        ttl,
    )
}

/// Backend that fails every call, like an unreachable Redis.
struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    fn name(&self) -> &'static str {
        "down"
    }
    async fn put(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn delete(&self, _: &str) -> StoreResult<u64> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn delete_matching(&self, _: &str) -> StoreResult<u64> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn health_check(&self) -> StoreResult<()> {
        Err(StoreError::Connection("connection refused".into()))
    }
}

/// Serves one corrupt entry and refuses to delete it.
struct StuckCorruptBackend;

#[async_trait]
impl CacheBackend for StuckCorruptBackend {
    fn name(&self) -> &'static str {
        "stuck"
    }
    async fn put(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
        Ok(())
    }
    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        Ok(Some("{ not json".to_string()))
    }
    async fn delete(&self, _: &str) -> StoreResult<u64> {
        Err(StoreError::Operation("READONLY replica".into()))
    }
    async fn delete_matching(&self, _: &str) -> StoreResult<u64> {
        Ok(0)
    }
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_fresh_hit_then_stale_miss_removes_entry() {
    let h = file_harness().await;
    let key = CacheKey::new(ArtifactType::Pantry, 42);
    let artifact = pantry_artifact(42, &h.clock, 3600);
    let start = h.clock.now();

    assert!(h.cache.put(&key, &artifact, Duration::from_secs(3600)).await);

    h.clock.set(start + ChronoDuration::seconds(10));
    assert_eq!(h.cache.get(&key).await, Some(artifact.clone()));

    h.clock.set(start + ChronoDuration::seconds(3601));
    assert_eq!(h.cache.get(&key).await, None);

    // The backing entry is gone even if time went backwards
    h.clock.set(start + ChronoDuration::seconds(10));
    assert_eq!(h.cache.peek(&key).await, None);

    let stats = h.cache.metrics().compute_stats();
    assert_eq!(stats.per_type["pantry"].hits, 1);
    assert_eq!(stats.per_type["pantry"].misses, 1);
}

#[tokio::test]
async fn test_stale_artifact_is_deleted_even_with_long_store_ttl() {
    let h = file_harness().await;
    let key = CacheKey::new(ArtifactType::Pantry, 5);
    // Store-level expiry far beyond the artifact TTL
    let artifact = pantry_artifact(5, &h.clock, 60);
    assert!(h.cache.put(&key, &artifact, Duration::from_secs(86_400)).await);

    h.clock.advance(ChronoDuration::seconds(61));
    assert_eq!(h.cache.get(&key).await, None, "stale hit must be a miss");
    assert_eq!(h.cache.peek(&key).await, None, "stale entry must be deleted");
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let store = Arc::new(FileStore::open(dir.path(), clock.clone()).await.unwrap());
    let (metrics, _) = metrics_for(clock.clone());
    let cache = ArtifactCache::new(store.clone(), metrics, clock.clone());

    let key = CacheKey::new(ArtifactType::Preferences, 3);
    store
        .put(&key.to_string(), "{\"owner_key\": \"garbage\"", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(cache.get(&key).await, None);
    assert_eq!(store.get(&key.to_string()).await.unwrap(), None);

    let stats = cache.metrics().compute_stats();
    assert_eq!(stats.per_type["preferences"].misses, 1);
    assert_eq!(stats.per_type["preferences"].errors, 0);
}

#[tokio::test]
async fn test_failed_eviction_counts_one_error() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let (metrics, _) = metrics_for(clock.clone());
    let cache = ArtifactCache::new(Arc::new(StuckCorruptBackend), metrics.clone(), clock);
    let key = CacheKey::new(ArtifactType::Pantry, 4);

    assert_eq!(cache.get(&key).await, None);

    let stats = metrics.compute_stats();
    assert_eq!(stats.per_type["pantry"].errors, 1);
    assert_eq!(stats.per_type["pantry"].misses, 0);
    assert_eq!(stats.per_type["pantry"].hits, 0);
    assert_eq!(metrics.consecutive_errors(), 1);
}

#[tokio::test]
async fn test_put_rejects_mismatched_type() {
    let h = file_harness().await;
    let pantry_key = CacheKey::new(ArtifactType::Pantry, 8);
    let prefs = Artifact::new(
        8,
        ArtifactPayload::Preferences(PreferenceArtifact::default()),
        h.clock.now(),
        600,
    );

    assert!(!h.cache.put(&pantry_key, &prefs, Duration::from_secs(600)).await);
    assert_eq!(h.cache.peek(&pantry_key).await, None);
    assert_eq!(h.cache.metrics().compute_stats().per_type["pantry"].errors, 1);
}

#[tokio::test]
async fn test_mistyped_entry_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let store = Arc::new(FileStore::open(dir.path(), clock.clone()).await.unwrap());
    let (metrics, _) = metrics_for(clock.clone());
    let cache = ArtifactCache::new(store.clone(), metrics, clock.clone());

    // Written behind the cache's back, as another writer might
    let pantry_key = CacheKey::new(ArtifactType::Pantry, 8);
    let prefs = Artifact::new(
        8,
        ArtifactPayload::Preferences(PreferenceArtifact::default()),
        clock.now(),
        600,
    );
    store
        .put(&pantry_key.to_string(), &prefs.to_json().unwrap(), Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(cache.get(&pantry_key).await, None);
    assert_eq!(store.get(&pantry_key.to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_peek_leaves_error_run_intact() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let (metrics, sink) = metrics_for(clock.clone());
    let down = ArtifactCache::new(Arc::new(DownBackend), metrics.clone(), clock.clone());

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
    let up = ArtifactCache::new(Arc::new(store), metrics.clone(), clock.clone());
    let key = CacheKey::new(ArtifactType::Pantry, 1);

    for _ in 0..4 {
        down.get(&key).await;
    }
    let before = metrics.compute_stats();
    assert_eq!(up.peek(&key).await, None);
    assert_eq!(down.peek(&key).await, None);
    let after = metrics.compute_stats();
    assert_eq!(before.per_type, after.per_type);
    assert_eq!(metrics.consecutive_errors(), 4);

    down.get(&key).await;
    assert_eq!(sink.count_of(AlertType::ErrorThresholdExceeded), 1);
}

#[tokio::test]
async fn test_degraded_store_trips_threshold_once_and_resets() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let (metrics, sink) = metrics_for(clock.clone());
    let down = ArtifactCache::new(Arc::new(DownBackend), metrics.clone(), clock.clone());
    let key = CacheKey::new(ArtifactType::Pantry, 1);

    for _ in 0..5 {
        assert_eq!(down.get(&key).await, None);
    }
    assert_eq!(metrics.consecutive_errors(), 5);
    assert_eq!(sink.count_of(AlertType::ErrorThresholdExceeded), 1);

    // The store comes back: same metrics, healthy backend
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
    let healthy = ArtifactCache::new(Arc::new(store), metrics.clone(), clock.clone());
    assert_eq!(healthy.get(&key).await, None);

    assert_eq!(metrics.consecutive_errors(), 0);
    assert_eq!(sink.count_of(AlertType::ErrorThresholdExceeded), 1);
}

#[tokio::test]
async fn test_every_operation_degrades_safely() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let (metrics, _) = metrics_for(clock.clone());
    let cache = ArtifactCache::new(Arc::new(DownBackend), metrics.clone(), clock.clone());
    let key = CacheKey::new(ArtifactType::Recipes, 2);
    let artifact = recipe_artifact(2, &clock, 60);

    assert!(!cache.put(&key, &artifact, Duration::from_secs(60)).await);
    assert_eq!(cache.get(&key).await, None);
    assert_eq!(cache.peek(&key).await, None);
    assert_eq!(cache.delete(&key).await, 0);
    assert_eq!(cache.delete_matching("recipes:2:*").await, 0);
    assert!(!cache.health_check().await);

    // peek is not counted
    let stats = metrics.compute_stats();
    assert_eq!(stats.total_errors, 5);
    assert_eq!(stats.total_hits + stats.total_misses, 0);
}

#[tokio::test]
async fn test_delete_and_delete_matching() {
    let h = file_harness().await;
    let plain = CacheKey::new(ArtifactType::Recipes, 7);
    let ctx1 = CacheKey::with_context(ArtifactType::Recipes, 7, "ctx1").unwrap();
    let ctx2 = CacheKey::with_context(ArtifactType::Recipes, 7, "ctx2").unwrap();
    let artifact = recipe_artifact(7, &h.clock, 600);

    for key in [&plain, &ctx1, &ctx2] {
        assert!(h.cache.put(key, &artifact, Duration::from_secs(600)).await);
    }

    assert_eq!(
        h.cache
            .delete_matching(&CacheKey::context_pattern(ArtifactType::Recipes, 7))
            .await,
        2
    );
    assert_eq!(h.cache.delete(&plain).await, 1);
    assert_eq!(h.cache.delete(&plain).await, 0);
    assert!(h.cache.health_check().await);
    assert!(h.sink.events().is_empty());
}
