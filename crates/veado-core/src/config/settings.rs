use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use veado_types::DEFAULT_LISTENER_TOKEN;

use super::dirs::default_instances_dir;

fn default_listener_token() -> String {
    DEFAULT_LISTENER_TOKEN.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connection_name_prefix() -> String {
    "veado-rs".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_instances_dir")]
    pub instances_dir: PathBuf,

    #[serde(default = "default_listener_token")]
    pub listener_token: String,

    /// Open a connection to every discovered instance
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Connection names are `<prefix>-<instance id>`
    #[serde(default = "default_connection_name_prefix")]
    pub connection_name_prefix: String,

    #[serde(default)]
    pub connection_config: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instances_dir: default_instances_dir(),
            listener_token: default_listener_token(),
            auto_connect: true,
            connection_name_prefix: default_connection_name_prefix(),
            connection_config: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from a JSON file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Connection label for an instance, sent as the `n` query parameter.
    #[must_use]
    pub fn connection_name(&self, instance_id: &str) -> String {
        format!("{}-{instance_id}", self.connection_name_prefix)
    }
}

/// Per-connection behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay; attempt `k` waits `k` times this long
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Keep state lists, current states and thumbnails per instance
    #[serde(default = "default_true")]
    pub enable_cache: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            enable_cache: true,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}
