//! Alert events and delivery.

use artifacts::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Kinds of alert the cache layer raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ConnectionFailure,
    ErrorThresholdExceeded,
    HealthCheckFailed,
    LowHitRate,
    HighLatency,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ConnectionFailure => "connection_failure",
            AlertType::ErrorThresholdExceeded => "error_threshold_exceeded",
            AlertType::HealthCheckFailed => "health_check_failed",
            AlertType::LowHitRate => "low_hit_rate",
            AlertType::HighLatency => "high_latency",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub alert_type: AlertType,
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for alerts (pager, webhook, test recorder, ...).
pub trait AlertSink: Send + Sync {
    fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()>;
}

impl<F> AlertSink for F
where
    F: Fn(&AlertEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Sink that keeps every delivered event in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_of(&self, alert_type: AlertType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.alert_type == alert_type)
            .count()
    }
}

impl AlertSink for MemoryAlertSink {
    fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Logs and forwards alerts.
pub struct Alerter {
    sink: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
}

impl Alerter {
    pub fn new(sink: Option<Arc<dyn AlertSink>>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Build an event, log it at error level and hand it to the sink.
    ///
    /// Sink errors and panics are caught and logged; the event is returned
    /// either way.
    pub fn emit(&self, alert_type: AlertType, details: BTreeMap<String, Value>) -> AlertEvent {
        let event = AlertEvent {
            alert_type,
            details,
            timestamp: self.clock.now(),
        };

        let rendered = serde_json::to_string(&event.details).unwrap_or_default();
        error!("Cache alert [{}]: {}", alert_type, rendered);

        if let Some(sink) = &self.sink {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Alert sink failed to deliver {}: {:#}", alert_type, e),
                Err(_) => error!("Alert sink panicked while delivering {}", alert_type),
            }
        }

        event
    }
}

impl fmt::Debug for Alerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alerter")
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
