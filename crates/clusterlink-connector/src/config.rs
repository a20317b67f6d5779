//! Connector configuration
//!
//! Stored in ~/.clusterlink/config.json. A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the IPC socket path
pub const SOCKET_ENV: &str = "CLUSTERLINK_SOCKET";

/// Connector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// IPC socket path (defaults to ~/.clusterlink/connector.sock)
    pub socket_path: Option<PathBuf>,

    /// How long a connect waits for the traffic manager to accept the client
    pub coordinator_ready_timeout_secs: u64,

    /// How long shutdown waits for in-flight calls
    pub soft_shutdown_timeout_ms: u64,

    /// Identifies this installation to the traffic manager and usage reports
    pub install_id: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            coordinator_ready_timeout_secs: 60,
            soft_shutdown_timeout_ms: 2000,
            install_id: None,
        }
    }
}

impl ConnectorConfig {
    pub fn coordinator_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.coordinator_ready_timeout_secs)
    }

    pub fn soft_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_shutdown_timeout_ms)
    }

    /// Resolve the socket path: environment, then config, then default
    pub fn socket_path(&self) -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(SOCKET_ENV) {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = &self.socket_path {
            return Ok(path.clone());
        }
        Ok(ConfigManager::config_dir()?.join("connector.sock"))
    }
}

/// Configuration manager
pub struct ConfigManager;

impl ConfigManager {
    /// Directory holding connector state
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".clusterlink"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load the configuration, generating and persisting an install ID if missing
    pub fn load() -> Result<ConnectorConfig> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<ConnectorConfig> {
        let mut config = if path.exists() {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            ConnectorConfig::default()
        };

        if config.install_id.is_none() {
            config.install_id = Some(uuid::Uuid::new_v4().to_string());
            Self::save_to(path, &config)?;
        }

        Ok(config)
    }

    pub fn save_to(path: &Path, config: &ConnectorConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}
