//! Backend contract for raw key/value storage.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures a backend can report. `ArtifactCache` converts all of them to
/// safe defaults plus an error count; they never reach its callers.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store is unreachable
    #[error("Cache store unreachable: {0}")]
    Connection(String),

    /// A single call failed (transient)
    #[error("Cache operation failed: {0}")]
    Operation(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Raw TTL-aware key/value storage.
///
/// Values are opaque strings; `ttl` is an expiry hint the backend honours
/// natively or emulates. Implementations must be safe to share between
/// tasks. Concurrent writes to one key resolve last-writer-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and stats
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// `Ok(None)` when the key is absent or its expiry hint has passed.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns the number of entries removed (0 or 1).
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Remove every key matching a glob pattern (`*` and `?`).
    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> StoreResult<()>;
}
