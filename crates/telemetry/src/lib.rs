//! # Telemetry Crate
//!
//! Hit/miss/error accounting for every cache operation, plus threshold
//! based alerting.
//!
//! ## Components
//!
//! ### CacheMetrics
//! Process-wide, shared behind an `Arc`. Counters are per artifact type,
//! latencies are kept in a rolling window of the last 100 operations and
//! the consecutive-error counter drives the error-threshold alert.
//!
//! ### Alerter
//! Every alert is logged at error level and, when configured, handed to an
//! injected `AlertSink`. A failing sink never takes the caller down.
//!
//! ## Example Usage
//!
//! ```ignore
//! use telemetry::{Alerter, CacheMetrics, CacheOperation, MetricsConfig, Outcome};
//!
//! let alerter = Arc::new(Alerter::new(Some(sink), clock.clone()));
//! let metrics = CacheMetrics::new(MetricsConfig::default(), alerter, clock);
//!
//! metrics.record_operation(CacheOperation::Get, Some(ArtifactType::Pantry), elapsed);
//! metrics.record_outcome(Outcome::Hit, Some(ArtifactType::Pantry));
//! let stats = metrics.compute_stats();
//! ```

pub mod alerts;
pub mod metrics;

pub use alerts::{AlertEvent, AlertSink, AlertType, Alerter, MemoryAlertSink};
pub use metrics::{
    AlertMode, CacheMetrics, CacheOperation, HealthIssue, HealthReport, MetricsConfig,
    MetricsSnapshot, Outcome, TypeSnapshot, LATENCY_WINDOW,
};
