//! Configuration traits and the shared `agent` section.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hassagent_common::{DeviceInfo, Format, LoggingConfig, ZenohConfig};

use crate::error::{AgentError, Result};

/// Files read, in order, for a stable machine identifier.
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Trait for agent configuration types.
///
/// Implement this trait for the binary's configuration struct to get
/// loading, validation, and access to the common sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use hassagent_framework::{AgentConfig, AgentSettings, LoggingConfig, ZenohConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyAgentConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub agent: AgentSettings,
///     pub sensors: MySensors,
/// }
///
/// impl AgentConfig for MyAgentConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn agent(&self) -> &AgentSettings {
///         &self.agent
///     }
/// }
/// ```
pub trait AgentConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the `agent` section.
    fn agent(&self) -> &AgentSettings;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Overrides should keep calling
    /// [`AgentSettings::validate`].
    fn validate(&self) -> Result<()> {
        self.agent().validate()
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(AgentError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::with_context(format!("Reading {}", path.display()), e))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// The `agent` section: identity, key space and dispatch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Key expression prefix for everything the agent publishes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Device name; defaults to the hostname.
    #[serde(default)]
    pub device_name: Option<String>,

    /// Device identifier; defaults to the machine id.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Payload format for sensor registrations and states.
    #[serde(default)]
    pub format: Format,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_key_prefix() -> String {
    "hassagent".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            device_name: None,
            device_id: None,
            format: Format::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(AgentError::validation("agent.key_prefix must not be empty"));
        }
        if self.key_prefix.contains(['*', '$', '?', '#']) || self.key_prefix.ends_with('/') {
            return Err(AgentError::validation(format!(
                "agent.key_prefix '{}' is not a valid key expression prefix",
                self.key_prefix
            )));
        }
        if matches!(&self.device_name, Some(name) if name.trim().is_empty()) {
            return Err(AgentError::validation("agent.device_name must not be blank"));
        }
        self.dispatch.validate()
    }

    /// Resolve the device metadata published with every status message.
    ///
    /// Configured values win; otherwise the hostname and machine id are used.
    pub fn device_info(&self, app_version: &str) -> DeviceInfo {
        let name = self
            .device_name
            .clone()
            .unwrap_or_else(|| local_hostname().unwrap_or_else(|| "localhost".to_string()));

        let id = self
            .device_id
            .clone()
            .or_else(machine_id)
            .unwrap_or_else(|| name.clone());

        DeviceInfo::new(name, id, app_version)
    }
}

/// Dispatch queue tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Jobs buffered before producers wait for the sink.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of worker tasks calling the sink.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AgentError::validation("agent.dispatch.workers must be at least 1"));
        }
        if self.queue_capacity < self.workers {
            return Err(AgentError::validation(format!(
                "agent.dispatch.queue_capacity ({}) must be at least the worker count ({})",
                self.queue_capacity, self.workers
            )));
        }
        Ok(())
    }
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

fn machine_id() -> Option<String> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        match std::fs::read_to_string(path) {
            Ok(content) => Some(content.trim().to_string()).filter(|id| !id.is_empty()),
            Err(e) => {
                debug!(path = %path, error = %e, "Machine id not readable");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use hassagent_common::ZenohMode;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        agent: AgentSettings,
    }

    impl AgentConfig for TestConfig {
        fn zenoh(&self) -> &ZenohConfig {
            &self.zenoh
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn agent(&self) -> &AgentSettings {
            &self.agent
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(AgentError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                // trailing commas and comments are fine
                agent: {{
                    key_prefix: "home/agents",
                    device_name: "laptop",
                    format: "cbor",
                    dispatch: {{ workers: 2 }},
                }},
            }}"#
        )
        .unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.agent.key_prefix, "home/agents");
        assert_eq!(config.agent.format, Format::Cbor);
        assert_eq!(config.agent.dispatch.workers, 2);
        assert_eq!(config.agent.dispatch.queue_capacity, 256);
        assert_eq!(config.zenoh.mode, ZenohMode::Peer);
    }

    #[test]
    fn test_parse_error() {
        let result = TestConfig::parse("{ agent: ");
        assert!(matches!(result, Err(AgentError::ConfigParse(_))));
    }

    #[test]
    fn test_validation() {
        let mut settings = AgentSettings::default();
        assert!(settings.validate().is_ok());

        settings.key_prefix = "hassagent/*".to_string();
        assert!(matches!(
            settings.validate(),
            Err(AgentError::ConfigValidation(_))
        ));

        settings.key_prefix = "hassagent".to_string();
        settings.dispatch.workers = 0;
        assert!(settings.validate().is_err());

        settings.dispatch = DispatchConfig {
            queue_capacity: 2,
            workers: 4,
        };
        assert!(settings.validate().is_err());

        let result = TestConfig::parse(r#"{ agent: { device_name: "  " } }"#);
        assert!(matches!(result, Err(AgentError::ConfigValidation(_))));
    }

    #[test]
    fn test_device_info_prefers_configured_values() {
        let settings = AgentSettings {
            device_name: Some("workstation".to_string()),
            device_id: Some("abc123".to_string()),
            ..Default::default()
        };

        let device = settings.device_info("1.2.3");
        assert_eq!(device.name, "workstation");
        assert_eq!(device.id, "abc123");
        assert_eq!(device.app_version, "1.2.3");
        assert_eq!(device.os, std::env::consts::OS);
    }

    #[test]
    fn test_device_info_falls_back() {
        let device = AgentSettings::default().device_info("0.2.0");
        assert!(!device.name.is_empty());
        assert!(!device.id.is_empty());
    }
}
