//! Backend selection with transparent fallback.

use artifacts::Clock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{AlertType, Alerter};
use tracing::{info, warn};

use crate::backend::{CacheBackend, StoreResult};
use crate::file_store::FileStore;
use crate::redis_store::RedisStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Redis,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Primary backend; the file store is the fallback
    pub backend: BackendKind,
    pub redis_url: String,
    pub file_path: PathBuf,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            file_path: PathBuf::from("artifact-cache"),
            connect_timeout_ms: 2_000,
            operation_timeout_ms: 500,
        }
    }
}

/// Build the configured backend, falling back to the file store when the
/// primary cannot be constructed or fails its health probe.
///
/// Only fails when the file store itself cannot be opened.
pub async fn connect_store(
    config: &CacheConfig,
    clock: Arc<dyn Clock>,
    alerter: &Alerter,
) -> StoreResult<Arc<dyn CacheBackend>> {
    match config.backend {
        BackendKind::File => {
            let store = FileStore::open(&config.file_path, clock).await?;
            info!("Using file cache store at {}", config.file_path.display());
            Ok(Arc::new(store))
        }
        BackendKind::Redis => {
            let primary = RedisStore::connect(
                &config.redis_url,
                Duration::from_millis(config.connect_timeout_ms),
                Duration::from_millis(config.operation_timeout_ms),
            )
            .await
            .map(|store| Arc::new(store) as Arc<dyn CacheBackend>);
            let fallback: Arc<dyn CacheBackend> =
                Arc::new(FileStore::open(&config.file_path, clock).await?);
            Ok(select_backend(primary, fallback, alerter).await)
        }
    }
}

/// Commit to `primary` only if it was built and passes `health_check`.
pub async fn select_backend(
    primary: StoreResult<Arc<dyn CacheBackend>>,
    fallback: Arc<dyn CacheBackend>,
    alerter: &Alerter,
) -> Arc<dyn CacheBackend> {
    let failure = match primary {
        Ok(store) => match store.health_check().await {
            Ok(()) => {
                info!("Using {} cache store", store.name());
                return store;
            }
            Err(e) => (store.name(), e.to_string()),
        },
        Err(e) => ("primary", e.to_string()),
    };

    let (backend, error) = failure;
    warn!(
        "Cache backend {} unavailable ({}), falling back to {}",
        backend,
        error,
        fallback.name()
    );
    let mut details = BTreeMap::new();
    details.insert("backend".to_string(), json!(backend));
    details.insert("error".to_string(), json!(error));
    details.insert("fallback".to_string(), json!(fallback.name()));
    alerter.emit(AlertType::ConnectionFailure, details);
    fallback
}
