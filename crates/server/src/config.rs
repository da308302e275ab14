//! Engine configuration.
//!
//! Every section is optional in the TOML file; missing fields take their
//! defaults.
//!
//! ```toml
//! [cache]
//! backend = "file"
//! file_path = "/var/cache/pantry"
//!
//! [metrics]
//! alert_mode = "level"
//!
//! [warming]
//! batch_size = 20
//! ```

use cache::CacheConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry::MetricsConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Ranking calls slower than this degrade the response
    pub ranking_timeout_ms: u64,
    pub recipe_ttl_secs: u64,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            ranking_timeout_ms: 2_000,
            recipe_ttl_secs: 7_200,
        }
    }
}

impl ServingConfig {
    pub fn ranking_timeout(&self) -> Duration {
        Duration::from_millis(self.ranking_timeout_ms)
    }

    pub fn recipe_ttl(&self) -> Duration {
        Duration::from_secs(self.recipe_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Users refreshed concurrently per batch
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 1_000,
        }
    }
}

impl WarmingConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub pipelines: PipelineConfig,
    pub serving: ServingConfig,
    pub warming: WarmingConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache::BackendKind;
    use telemetry::AlertMode;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.cache.backend, BackendKind::Redis);
        assert_eq!(config.metrics.error_threshold, 5);
        assert_eq!(config.pipelines.pantry_ttl_secs, 3_600);
        assert_eq!(config.serving.recipe_ttl_secs, 7_200);
        assert_eq!(config.warming.batch_size, 10);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            backend = "file"
            file_path = "/tmp/pantry-cache"

            [metrics]
            alert_mode = "level"

            [warming]
            batch_delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.backend, BackendKind::File);
        assert_eq!(config.cache.operation_timeout_ms, 500);
        assert_eq!(config.metrics.alert_mode, AlertMode::Level);
        assert_eq!(config.warming.batch_size, 10);
        assert_eq!(config.warming.batch_delay(), Duration::ZERO);
    }

    #[test]
    fn test_bad_value_is_rejected() {
        let result = EngineConfig::from_toml_str("[cache]\nbackend = \"memcached\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        tokio::fs::write(&path, "[serving]\nranking_timeout_ms = 250\n")
            .await
            .unwrap();

        let config = EngineConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.serving.ranking_timeout(), Duration::from_millis(250));

        let missing = EngineConfig::load_from_file(dir.path().join("nope.toml")).await;
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
