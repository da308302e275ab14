//! The artifact cache: codec, freshness and metrics over a raw backend.
//!
//! Every public operation times itself and records exactly one outcome on
//! every exit path. Backend errors are logged, counted and swallowed here;
//! callers only ever see `bool`, `Option` or a count.

use artifacts::{Artifact, CacheKey, Clock, Freshness};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use telemetry::{CacheMetrics, CacheOperation, Outcome};
use tracing::{debug, warn};

use crate::backend::{CacheBackend, StoreError};

#[derive(Clone)]
pub struct ArtifactCache {
    backend: Arc<dyn CacheBackend>,
    metrics: Arc<CacheMetrics>,
    clock: Arc<dyn Clock>,
    /// Result of the most recent health check
    healthy: Arc<AtomicBool>,
}

impl ArtifactCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        metrics: Arc<CacheMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            metrics,
            clock,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Store `artifact` under `key` with a backend expiry hint of `ttl`.
    ///
    /// Refuses an artifact whose type differs from the key's.
    pub async fn put(&self, key: &CacheKey, artifact: &Artifact, ttl: Duration) -> bool {
        let start = Instant::now();
        let artifact_type = Some(key.artifact_type());

        if artifact.artifact_type() != key.artifact_type() {
            warn!(
                "Refusing to store a {} artifact under {}",
                artifact.artifact_type(),
                key
            );
            self.metrics
                .record_operation(CacheOperation::Put, artifact_type, start.elapsed());
            self.metrics.record_outcome(Outcome::Error, artifact_type);
            self.metrics.check_error_threshold();
            return false;
        }

        let raw = match artifact.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not encode artifact for {}: {}", key, e);
                self.metrics
                    .record_operation(CacheOperation::Put, artifact_type, start.elapsed());
                self.metrics.record_outcome(Outcome::Error, artifact_type);
                self.metrics.check_error_threshold();
                return false;
            }
        };

        let result = self.backend.put(&key.to_string(), &raw, ttl).await;
        self.metrics
            .record_operation(CacheOperation::Put, artifact_type, start.elapsed());
        match result {
            Ok(()) => {
                self.metrics.record_success();
                debug!("Cached {} (ttl {:?})", key, ttl);
                true
            }
            Err(e) => {
                self.record_failure(CacheOperation::Put, key, &e);
                false
            }
        }
    }

    /// Fetch a fresh artifact. Stale, undecodable or mistyped entries are
    /// deleted and reported as misses, or as one error if the delete fails.
    pub async fn get(&self, key: &CacheKey) -> Option<Artifact> {
        let start = Instant::now();
        let artifact_type = Some(key.artifact_type());
        let key_text = key.to_string();

        let raw = match self.backend.get(&key_text).await {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics
                    .record_operation(CacheOperation::Get, artifact_type, start.elapsed());
                self.record_failure(CacheOperation::Get, key, &e);
                return None;
            }
        };

        let mut eviction = Ok(());
        let found = match raw {
            None => None,
            Some(raw) => match Artifact::from_json(&raw) {
                Ok(artifact) if artifact.artifact_type() != key.artifact_type() => {
                    warn!(
                        "Entry {} holds a {} artifact, discarding",
                        key,
                        artifact.artifact_type()
                    );
                    eviction = self.evict(key).await;
                    None
                }
                Ok(artifact) if !artifact.is_fresh(self.clock.now()) => {
                    debug!("Entry {} is stale, discarding", key);
                    eviction = self.evict(key).await;
                    None
                }
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    warn!("Corrupt cache entry {}: {}", key, e);
                    eviction = self.evict(key).await;
                    None
                }
            },
        };

        self.metrics
            .record_operation(CacheOperation::Get, artifact_type, start.elapsed());
        match eviction {
            Err(e) => self.record_failure(CacheOperation::Get, key, &e),
            Ok(()) if found.is_some() => self.metrics.record_outcome(Outcome::Hit, artifact_type),
            Ok(()) => self.metrics.record_outcome(Outcome::Miss, artifact_type),
        }
        found
    }

    /// Read-only view for status reporting: returns whatever decodes,
    /// stale or not. Deletes nothing and leaves the metrics untouched.
    pub async fn peek(&self, key: &CacheKey) -> Option<Artifact> {
        match self.backend.get(&key.to_string()).await {
            Ok(raw) => raw.and_then(|raw| Artifact::from_json(&raw).ok()),
            Err(e) => {
                debug!("Cache peek {} failed: {}", key, e);
                None
            }
        }
    }

    /// Remove one entry, returning how many were removed.
    pub async fn delete(&self, key: &CacheKey) -> u64 {
        let start = Instant::now();
        let artifact_type = Some(key.artifact_type());
        let result = self.backend.delete(&key.to_string()).await;
        self.metrics
            .record_operation(CacheOperation::Delete, artifact_type, start.elapsed());

        match result {
            Ok(count) => {
                self.metrics.record_success();
                count
            }
            Err(e) => {
                self.record_failure(CacheOperation::Delete, key, &e);
                0
            }
        }
    }

    /// Remove every entry whose key matches the glob `pattern`.
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        let start = Instant::now();
        let result = self.backend.delete_matching(pattern).await;
        self.metrics
            .record_operation(CacheOperation::DeleteMatching, None, start.elapsed());

        match result {
            Ok(count) => {
                self.metrics.record_success();
                debug!("Removed {} entries matching {}", count, pattern);
                count
            }
            Err(e) => {
                warn!("Cache delete_matching {} failed: {}", pattern, e);
                self.metrics.record_outcome(Outcome::Error, None);
                self.metrics.check_error_threshold();
                0
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        let start = Instant::now();
        let result = self.backend.health_check().await;
        self.metrics
            .record_operation(CacheOperation::HealthCheck, None, start.elapsed());

        let healthy = match result {
            Ok(()) => {
                self.metrics.record_success();
                true
            }
            Err(e) => {
                warn!("Cache backend {} failed health check: {}", self.backend.name(), e);
                self.metrics.record_outcome(Outcome::Error, None);
                self.metrics.check_error_threshold();
                false
            }
        };
        self.healthy.store(healthy, Ordering::SeqCst);
        healthy
    }

    /// Outcome of the last `health_check`, without probing the backend.
    /// True until the first check runs.
    pub fn last_known_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Best-effort removal of a bad entry found during `get`.
    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.backend.delete(&key.to_string()).await.map(|_| ())
    }

    fn record_failure(&self, op: CacheOperation, key: &CacheKey, error: &StoreError) {
        if error.is_connection() {
            warn!("Cache store unreachable during {} {}: {}", op, key, error);
        } else {
            warn!("Cache {} {} failed: {}", op, key, error);
        }
        self.metrics
            .record_outcome(Outcome::Error, Some(key.artifact_type()));
        self.metrics.check_error_threshold();
    }
}
