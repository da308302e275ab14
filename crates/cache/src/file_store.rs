//! Local-file cache backend.
//!
//! Each key is stored as one JSON envelope named after the hex-encoded key,
//! so any key text is a valid filename and the key can be recovered from
//! the name when scanning for pattern deletes. Expiry is emulated: the
//! envelope carries `expires_at` and expired envelopes are removed when
//! they are read.

use artifacts::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::backend::{CacheBackend, StoreError, StoreResult};
use crate::pattern::GlobPattern;

const ENTRY_EXTENSION: &str = "json";
const PROBE_FILE: &str = ".health-probe";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    value: String,
}

pub struct FileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StoreError::Connection(format!("cannot create {}: {}", root.display(), e))
        })?;
        debug!("File cache store opened at {}", root.display());
        Ok(Self { root, clock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", hex::encode(key.as_bytes()), ENTRY_EXTENSION))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    async fn remove(path: &Path) -> StoreResult<u64> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(1),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl CacheBackend for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let envelope = Envelope {
            key: key.to_string(),
            stored_at: now,
            expires_at,
            value: value.to_string(),
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| StoreError::Operation(format!("encoding envelope: {}", e)))?;

        // Write-then-rename keeps readers from ever seeing a torn file
        let target = self.path_for(key);
        let staging = self.root.join(format!(
            ".{}.{}.tmp",
            hex::encode(key.as_bytes()),
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&staging, body).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding unreadable cache envelope for {}: {}", key, e);
                Self::remove(&path).await?;
                return Ok(None);
            }
        };

        if self.clock.now() >= envelope.expires_at {
            debug!("Cache envelope for {} expired at {}", key, envelope.expires_at);
            Self::remove(&path).await?;
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        Self::remove(&self.path_for(key)).await
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let glob = GlobPattern::new(pattern)?;
        let mut entries = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(key) = Self::key_from_path(&path) else {
                continue;
            };
            if glob.matches(&key) {
                removed += Self::remove(&path).await?;
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let probe = self.root.join(PROBE_FILE);
        fs::write(&probe, b"ok").await.map_err(|e| {
            StoreError::Connection(format!("{} not writable: {}", self.root.display(), e))
        })?;
        Self::remove(&probe).await?;
        Ok(())
    }
}
