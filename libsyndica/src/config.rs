//! Configuration management for Syndica

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Master key for credential encryption. Prefer SYNDICA_MASTER_KEY over
    /// putting key material in the config file.
    pub master_key: Option<String>,
}

impl VaultConfig {
    /// Resolve the master key, environment variable first.
    pub fn resolve_master_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("SYNDICA_MASTER_KEY") {
            if !key.is_empty() {
                return Ok(key);
            }
        }
        self.master_key
            .clone()
            .ok_or_else(|| ConfigError::MissingField("vault.master_key".to_string()).into())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Shared secret compared against the bearer token supplied by the
    /// periodic or manual trigger.
    pub shared_secret: Option<String>,
}

impl TriggerConfig {
    pub fn resolve_shared_secret(&self) -> Result<String> {
        if let Ok(secret) = std::env::var("SYNDICA_TRIGGER_SECRET") {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        self.shared_secret
            .clone()
            .ok_or_else(|| ConfigError::MissingField("trigger.shared_secret".to_string()).into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Seconds between dispatcher sweeps.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Retry bound enforced by the retry coordinator.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub mastodon: Option<MastodonConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub enabled: bool,
    /// Instance base URL, e.g. "https://mastodon.social"
    pub base_url: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndica/posts.db".to_string(),
            },
            vault: VaultConfig::default(),
            trigger: TriggerConfig::default(),
            scheduling: SchedulingConfig::default(),
            platforms: PlatformsConfig {
                mastodon: Some(MastodonConfig {
                    enabled: false,
                    base_url: "https://mastodon.social".to_string(),
                }),
            },
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICA_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndica").join("config.toml"))
}
