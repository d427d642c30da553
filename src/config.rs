//! Configuration management for ranking ingestion
//!
//! Settings are loaded from TOML with the following precedence:
//!
//! 1. An explicit `--config` path
//! 2. `./ranking-ingest.toml`
//! 3. `<config dir>/ranking-ingest/config.toml`
//! 4. Built-in defaults
//!
//! Every table and field is optional. Secrets never live here; the pixiv
//! session cookie comes from the `PIXIV_SESSION` environment variable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::client::ClientConfig;
use crate::app::models::AssetType;
use crate::app::queue::TaskQueueConfig;
use crate::app::sources::SourcesConfig;
use crate::constants::{logging, storage};
use crate::errors::{AppError, ConfigError, ConfigResult, Result};

/// Directory name used under the platform config directory
const APP_DIR_NAME: &str = "ranking-ingest";

/// Project-local configuration file name
const LOCAL_CONFIG_FILE: &str = "ranking-ingest.toml";

/// Unified application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Document snapshot and blob locations
    pub storage: StorageConfig,
    /// Outbound HTTP settings shared by every source
    pub client: ClientConfig,
    /// Per-source task queue settings
    pub queue: TaskQueueConfig,
    /// Per-source listing settings
    pub sources: SourcesConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// The `[storage]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the snapshot and blob directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Public origin prefixed to blob keys by `url_for`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    /// Configured data directory, or the platform default
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Document store snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.resolved_data_dir().join(storage::SNAPSHOT_FILE_NAME)
    }

    /// Blob store root
    pub fn blobs_dir(&self) -> PathBuf {
        self.resolved_data_dir().join(storage::BLOBS_DIR_NAME)
    }

    /// Parsed public base URL
    pub fn public_base_url(&self) -> ConfigResult<Option<Url>> {
        self.public_base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
                    field: "storage.public_base_url".to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

/// The `[logging]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join("data"))
        .unwrap_or_else(|| PathBuf::from("./ranking-ingest-data"))
}

impl AppConfig {
    /// Load configuration from the first file found, or defaults
    ///
    /// An explicit path that does not exist is an error; missing default
    /// locations are not.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        let config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> ConfigResult<()> {
        self.queue
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                field: "queue".to_string(),
                value: format!("{:?}", self.queue),
                reason: e.to_string(),
            })?;

        for asset_type in AssetType::ALL {
            let settings = self.sources.get(asset_type);
            if settings.max_pages == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("sources.{}.max_pages", asset_type),
                    value: "0".to_string(),
                    reason: "at least one listing page must be fetched".to_string(),
                });
            }
            if let Some(base_url) = &settings.base_url {
                Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
                    field: format!("sources.{}.base_url", asset_type),
                    value: base_url.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        self.storage.public_base_url()?;

        let level = self.logging.level.to_ascii_lowercase();
        if !["error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: "expected error, warn, info, debug or trace".to_string(),
            });
        }
        Ok(())
    }

    /// Find a configuration file in the standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(format!("./{}", LOCAL_CONFIG_FILE))];
        if let Ok(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }
        None
    }

    /// Per-user configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR_NAME).join("config.toml"))
    }

    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::from)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the commented default file; refuses to overwrite unless `force`
    pub async fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(AppError::generic(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, Self::generate_default_config_content()).await?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Default configuration content with explanatory comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# ranking-ingest configuration
# Every setting is optional; the values below are the built-in defaults.
# Durations use humantime syntax such as "250ms", "10s" or "30m".

[storage]
# Snapshot and blob directory
# data_dir = "{data_dir}"
# Origin used to build public blob URLs
# public_base_url = "https://cdn.example.com/assets/"

[client]
user_agent = "{user_agent}"
request_timeout = "60s"
connect_timeout = "30s"
pool_idle_timeout = "90s"
pool_max_per_host = 4
# Retries after HTTP 429/503 or transport errors, with a fixed delay
max_retries = 3
retry_delay = "5s"

[queue]
# Each source has its own queue with these settings
max_concurrent_dispatches = 1
max_dispatches_per_second = 0.1
max_attempts = 5
min_backoff = "10s"
max_backoff = "10m"
schedule_delay = "1s"
# Tasks not dispatched within this window are dropped; a later run
# rediscovers them
dispatch_deadline = "30m"
download_timeout = "2m"

# Unset base_url and mode fall back to each source's public endpoint
# and default ranking mode.
[sources.pixiv]
enabled = true
# base_url = "https://www.pixiv.net"
# mode = "daily"
max_pages = 10
inter_page_delay = "10s"
rate_limit_rps = 2
# Serve listings and assets from a JSON file instead of the network
# fixture = "/path/to/pixiv.json"

[sources.danbooru]
enabled = true
# mode = "day"
max_pages = 10
inter_page_delay = "10s"
rate_limit_rps = 2

[sources.sankaku]
enabled = true
# mode = "popularity"
max_pages = 10
inter_page_delay = "10s"
rate_limit_rps = 2
# limit = 40

[logging]
level = "info"  # error, warn, info, debug, trace
"#,
            data_dir = default_data_dir().display(),
            user_agent = crate::constants::http::USER_AGENT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.queue.max_concurrent_dispatches, 1);
        assert_eq!(config.sources.enabled().len(), 3);
        assert!(config.validate().is_ok());
    }

    /// Test the generated default file
    ///
    /// Verifies that the commented template parses back to the built-in
    /// defaults.
    #[test]
    fn test_config_file_generation() {
        let content = AppConfig::generate_default_config_content();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(parsed.queue, defaults.queue);
        assert_eq!(parsed.sources.danbooru, defaults.sources.danbooru);
        assert_eq!(parsed.client.retry_delay, defaults.client.retry_delay);
        assert_eq!(parsed.client.request_timeout, defaults.client.request_timeout);
        assert_eq!(parsed.logging, defaults.logging);
        assert!(content.contains("[sources.pixiv]"));
    }

    #[tokio::test]
    async fn test_config_loading_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppConfig::load(Some(temp_dir.path().join("missing.toml"))).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_config_loading_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");
        tokio::fs::write(
            &config_path,
            r#"
[storage]
data_dir = "/var/lib/ranking"

[queue]
max_attempts = 2
min_backoff = "1s"

[sources.sankaku]
enabled = false

[logging]
level = "debug"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load(Some(config_path)).await.unwrap();

        assert_eq!(config.queue.max_attempts, 2);
        assert_eq!(config.queue.min_backoff, Duration::from_secs(1));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.storage.snapshot_path(),
            PathBuf::from("/var/lib/ranking/documents.json")
        );
        assert_eq!(
            config.sources.enabled(),
            vec![AssetType::Pixiv, AssetType::Danbooru]
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.sources.pixiv.max_pages = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.min_backoff = Duration::from_secs(60);
        config.queue.max_backoff = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.max_dispatches_per_second = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_write_default_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        AppConfig::write_default(&path, false).await.unwrap();
        assert!(AppConfig::write_default(&path, false).await.is_err());
        AppConfig::write_default(&path, true).await.unwrap();

        let config = AppConfig::load(Some(path)).await.unwrap();
        assert_eq!(config.queue.max_attempts, 5);
    }

    #[test]
    fn test_effective_config_renders() {
        let rendered = AppConfig::default().to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.sources, SourcesConfig::default());
    }
}
