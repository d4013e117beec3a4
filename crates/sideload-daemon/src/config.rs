//! Configuration loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sideload_discovery::RegistryConfig;
use sideload_queue::QueueConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Metadata and in-progress downloads
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Extracted releases
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/sideload/cache")
}

fn default_download_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("SideloadDownloads")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Mirror base URI; takes precedence over `credentials_url`
    #[serde(default)]
    pub base_uri: Option<String>,
    /// Archive password used with `base_uri`
    #[serde(default)]
    pub password: String,
    /// JSON document with `baseUri` and a base64 `password`
    #[serde(default)]
    pub credentials_url: Option<String>,
    /// Age after which cached metadata and credentials are fetched again
    #[serde(default = "default_max_age_hours")]
    pub metadata_max_age_hours: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_uri: None,
            password: String::new(),
            credentials_url: None,
            metadata_max_age_hours: default_max_age_hours(),
        }
    }
}

fn default_max_age_hours() -> u64 {
    24
}

/// Explicit tool paths; unset tools are looked up on `PATH`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub adb: Option<PathBuf>,
    #[serde(default)]
    pub rclone: Option<PathBuf>,
    #[serde(default)]
    pub sevenzip: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

fn default_tick_interval() -> u64 {
    500
}

impl Config {
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            poll_interval_ms: self.devices.poll_interval_ms,
            ..RegistryConfig::default()
        }
    }

    pub fn to_queue_config(&self, archive_password: &str) -> QueueConfig {
        QueueConfig {
            tick_interval_ms: self.queue.tick_interval_ms,
            archive_password: archive_password.to_string(),
        }
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
