//! Configuration sections shared by every agent binary.
//!
//! Agent-specific configuration embeds these sections; loading and
//! validation live with the agent's own config type.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role the agent's Zenoh session plays in the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZenohMode {
    Client,
    #[default]
    Peer,
    Router,
}

impl ZenohMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZenohMode::Client => "client",
            ZenohMode::Peer => "peer",
            ZenohMode::Router => "router",
        }
    }
}

impl std::fmt::Display for ZenohMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `zenoh` section: how the status and sensor channels reach the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZenohConfig {
    #[serde(default)]
    pub mode: ZenohMode,

    /// Endpoints to connect to, e.g. `tcp/192.168.1.10:7447`.
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on (peer and router modes).
    #[serde(default)]
    pub listen: Vec<String>,
}

impl ZenohConfig {
    /// Translate into a native Zenoh configuration.
    pub fn to_zenoh_config(&self) -> Result<zenoh::Config> {
        let mut config = zenoh::Config::default();

        insert(&mut config, "mode", &self.mode.as_str())?;
        if !self.connect.is_empty() {
            insert(&mut config, "connect/endpoints", &self.connect)?;
        }
        if !self.listen.is_empty() {
            insert(&mut config, "listen/endpoints", &self.listen)?;
        }

        Ok(config)
    }
}

fn insert<T: Serialize + ?Sized>(config: &mut zenoh::Config, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    config
        .insert_json5(key, &json)
        .map_err(|e| Error::Config(format!("Invalid zenoh setting '{key}': {e}")))
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// The `logging` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `hassagent_dbus=debug,info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Same settings with the level replaced, if one is given.
    pub fn with_level_override(&self, level: Option<&str>) -> Self {
        match level {
            Some(level) => Self {
                level: level.to_string(),
                format: self.format,
            },
            None => self.clone(),
        }
    }
}
