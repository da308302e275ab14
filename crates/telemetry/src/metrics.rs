//! Cache operation metrics and threshold checks.
//!
//! One `CacheMetrics` is shared by every cache client in the process. All
//! counters sit behind a mutex or are atomics, so foreground requests and
//! background refresh tasks can record concurrently.

use artifacts::{ArtifactType, Clock};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::alerts::{AlertType, Alerter};

/// Number of durations kept per artifact type for latency averages
pub const LATENCY_WINDOW: usize = 100;

/// Label used for operations that are not tied to one artifact type
const OTHER_LABEL: &str = "other";

// =============================================================================
// Configuration
// =============================================================================

/// Whether the error-threshold alert fires once per crossing or on every
/// check while the threshold is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    #[default]
    Edge,
    Level,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Consecutive errors before ErrorThresholdExceeded fires
    pub error_threshold: u64,
    pub alert_mode: AlertMode,
    /// Operations slower than this log a warning
    pub slow_operation_ms: u64,
    /// Minimum spacing between periodic health checks
    pub health_check_interval_secs: u64,
    pub min_hit_rate_percent: f64,
    /// Hit rate is only judged once a type has more observations than this
    pub min_observations: u64,
    pub max_avg_latency_ms: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            alert_mode: AlertMode::Edge,
            slow_operation_ms: 100,
            health_check_interval_secs: 60,
            min_hit_rate_percent: 50.0,
            min_observations: 10,
            max_avg_latency_ms: 100.0,
        }
    }
}

// =============================================================================
// Recorded values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Get,
    Put,
    Delete,
    DeleteMatching,
    HealthCheck,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Put => "put",
            CacheOperation::Delete => "delete",
            CacheOperation::DeleteMatching => "delete_matching",
            CacheOperation::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Error,
}

#[derive(Debug, Default)]
struct TypeStats {
    hits: u64,
    misses: u64,
    errors: u64,
    durations: VecDeque<Duration>,
}

impl TypeStats {
    fn snapshot(&self) -> TypeSnapshot {
        let observations = self.hits + self.misses;
        let hit_rate = if observations == 0 {
            0.0
        } else {
            self.hits as f64 / observations as f64 * 100.0
        };
        let avg_latency_ms = if self.durations.is_empty() {
            0.0
        } else {
            let total: Duration = self.durations.iter().sum();
            total.as_secs_f64() * 1000.0 / self.durations.len() as f64
        };
        TypeSnapshot {
            hits: self.hits,
            misses: self.misses,
            errors: self.errors,
            hit_rate,
            avg_latency_ms,
            latency_samples: self.durations.len(),
        }
    }
}

/// Point-in-time view of one artifact type's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Percentage of hits among hits + misses, 0 when nothing was observed
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    pub latency_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub per_type: BTreeMap<String, TypeSnapshot>,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_errors: u64,
    pub overall_hit_rate: f64,
    pub consecutive_errors: u64,
    pub last_error: Option<DateTime<Utc>>,
}

/// One breached threshold found by the periodic health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    pub kind: AlertType,
    pub artifact_type: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

// =============================================================================
// CacheMetrics
// =============================================================================

pub struct CacheMetrics {
    config: MetricsConfig,
    alerter: Arc<Alerter>,
    clock: Arc<dyn Clock>,
    per_type: Mutex<BTreeMap<&'static str, TypeStats>>,
    consecutive_errors: AtomicU64,
    /// Cleared when the threshold alert fires, set again by a success
    threshold_armed: AtomicBool,
    last_error: Mutex<Option<DateTime<Utc>>>,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
}

fn label(artifact_type: Option<ArtifactType>) -> &'static str {
    artifact_type.map(|t| t.as_str()).unwrap_or(OTHER_LABEL)
}

impl CacheMetrics {
    pub fn new(config: MetricsConfig, alerter: Arc<Alerter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            alerter,
            clock,
            per_type: Mutex::new(BTreeMap::new()),
            consecutive_errors: AtomicU64::new(0),
            threshold_armed: AtomicBool::new(true),
            last_error: Mutex::new(None),
            last_health_check: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn alerter(&self) -> &Arc<Alerter> {
        &self.alerter
    }

    /// Append a duration to the type's rolling window.
    pub fn record_operation(
        &self,
        op: CacheOperation,
        artifact_type: Option<ArtifactType>,
        duration: Duration,
    ) {
        {
            let mut per_type = self.per_type.lock().unwrap_or_else(PoisonError::into_inner);
            let stats = per_type.entry(label(artifact_type)).or_default();
            if stats.durations.len() == LATENCY_WINDOW {
                stats.durations.pop_front();
            }
            stats.durations.push_back(duration);
        }

        if duration > Duration::from_millis(self.config.slow_operation_ms) {
            warn!(
                "Slow cache operation: {} on {} took {:.2?}",
                op,
                label(artifact_type),
                duration
            );
        } else {
            debug!("Cache {} on {} took {:.2?}", op, label(artifact_type), duration);
        }
    }

    /// Count a hit, miss or error.
    pub fn record_outcome(&self, outcome: Outcome, artifact_type: Option<ArtifactType>) {
        {
            let mut per_type = self.per_type.lock().unwrap_or_else(PoisonError::into_inner);
            let stats = per_type.entry(label(artifact_type)).or_default();
            match outcome {
                Outcome::Hit => stats.hits += 1,
                Outcome::Miss => stats.misses += 1,
                Outcome::Error => stats.errors += 1,
            }
        }

        match outcome {
            Outcome::Error => {
                self.consecutive_errors.fetch_add(1, Ordering::SeqCst);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(self.clock.now());
            }
            Outcome::Hit | Outcome::Miss => self.record_success(),
        }
    }

    /// Reset the consecutive-error run after any successful operation.
    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.threshold_armed.store(true, Ordering::SeqCst);
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<DateTime<Utc>> {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit ErrorThresholdExceeded when the consecutive-error run has reached
    /// the configured threshold. Returns whether an alert was emitted.
    pub fn check_error_threshold(&self) -> bool {
        let count = self.consecutive_errors();
        if count < self.config.error_threshold {
            return false;
        }

        let should_fire = match self.config.alert_mode {
            AlertMode::Edge => self.threshold_armed.swap(false, Ordering::SeqCst),
            AlertMode::Level => true,
        };
        if !should_fire {
            return false;
        }

        let mut details = BTreeMap::new();
        details.insert("consecutive_errors".to_string(), json!(count));
        details.insert("threshold".to_string(), json!(self.config.error_threshold));
        if let Some(last) = self.last_error() {
            details.insert("last_error".to_string(), json!(last.to_rfc3339()));
        }
        self.alerter.emit(AlertType::ErrorThresholdExceeded, details);
        true
    }

    pub fn compute_stats(&self) -> MetricsSnapshot {
        let per_type: BTreeMap<String, TypeSnapshot> = self
            .per_type
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, stats)| (name.to_string(), stats.snapshot()))
            .collect();

        let total_hits: u64 = per_type.values().map(|s| s.hits).sum();
        let total_misses: u64 = per_type.values().map(|s| s.misses).sum();
        let total_errors: u64 = per_type.values().map(|s| s.errors).sum();
        let observations = total_hits + total_misses;
        let overall_hit_rate = if observations == 0 {
            0.0
        } else {
            total_hits as f64 / observations as f64 * 100.0
        };

        MetricsSnapshot {
            per_type,
            total_hits,
            total_misses,
            total_errors,
            overall_hit_rate,
            consecutive_errors: self.consecutive_errors(),
            last_error: self.last_error(),
        }
    }

    /// Evaluate hit-rate and latency thresholds, at most once per interval.
    ///
    /// Returns `None` when the previous check is too recent. Otherwise every
    /// breached threshold is collected into one HealthCheckFailed alert.
    pub fn periodic_health_check(&self) -> Option<HealthReport> {
        let now = self.clock.now();
        {
            let mut last = self
                .last_health_check
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let interval = i64::try_from(self.config.health_check_interval_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .unwrap_or(ChronoDuration::MAX);
            if let Some(previous) = *last {
                if now.signed_duration_since(previous) < interval {
                    return None;
                }
            }
            *last = Some(now);
        }

        let stats = self.compute_stats();
        let mut issues = Vec::new();
        for (name, snapshot) in &stats.per_type {
            let observations = snapshot.hits + snapshot.misses;
            if observations > self.config.min_observations
                && snapshot.hit_rate < self.config.min_hit_rate_percent
            {
                issues.push(HealthIssue {
                    kind: AlertType::LowHitRate,
                    artifact_type: name.clone(),
                    value: snapshot.hit_rate,
                    threshold: self.config.min_hit_rate_percent,
                });
            }
            if snapshot.latency_samples > 0
                && snapshot.avg_latency_ms > self.config.max_avg_latency_ms
            {
                issues.push(HealthIssue {
                    kind: AlertType::HighLatency,
                    artifact_type: name.clone(),
                    value: snapshot.avg_latency_ms,
                    threshold: self.config.max_avg_latency_ms,
                });
            }
        }

        if !issues.is_empty() {
            let mut details = BTreeMap::new();
            details.insert("issue_count".to_string(), json!(issues.len()));
            details.insert(
                "issues".to_string(),
                serde_json::to_value(&issues).unwrap_or(Value::Null),
            );
            self.alerter.emit(AlertType::HealthCheckFailed, details);
        } else {
            debug!("Periodic cache health check passed");
        }

        Some(HealthReport {
            checked_at: now,
            issues,
        })
    }
}

impl fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMetrics")
            .field("config", &self.config)
            .field("consecutive_errors", &self.consecutive_errors())
            .finish()
    }
}
