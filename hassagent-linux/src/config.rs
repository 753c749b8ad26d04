//! Configuration for the Linux agent.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hassagent_framework::{
    AgentConfig, AgentError, AgentSettings, LoggingConfig, Result, ZenohConfig,
};

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinuxAgentConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity, key space and dispatch settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Which sensors to run and how.
    #[serde(default)]
    pub sensors: SensorsConfig,
}

impl AgentConfig for LinuxAgentConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn agent(&self) -> &AgentSettings {
        &self.agent
    }

    fn validate(&self) -> Result<()> {
        self.agent.validate()?;

        let sensors = &self.sensors;
        for (name, poll) in [
            ("disk", &sensors.disk.poll),
            ("network", &sensors.network.poll),
            ("memory", &sensors.memory),
        ] {
            if poll.enabled && poll.interval_secs == 0 {
                return Err(AgentError::validation(format!(
                    "sensors.{name}.interval_secs must be > 0"
                )));
            }
        }

        if sensors.scripts.enabled {
            if sensors.scripts.path.as_os_str().is_empty() {
                return Err(AgentError::validation("sensors.scripts.path must not be empty"));
            }
            if sensors.scripts.timeout_secs == 0 {
                return Err(AgentError::validation(
                    "sensors.scripts.timeout_secs must be > 0",
                ));
            }
        }

        // At least one sensor should be enabled
        if !sensors.disk.poll.enabled
            && !sensors.network.poll.enabled
            && !sensors.memory.enabled
            && !sensors.battery.enabled
            && !sensors.session.enabled
            && !sensors.scripts.enabled
        {
            return Err(AgentError::validation("At least one sensor must be enabled"));
        }

        Ok(())
    }
}

/// Per-sensor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(default)]
    pub disk: DiskConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub memory: PollConfig,

    /// Battery state from UPower.
    #[serde(default)]
    pub battery: WatchConfig,

    /// Idle and lock state of the user's login session.
    #[serde(default)]
    pub session: WatchConfig,

    /// Sensors reported by user scripts.
    #[serde(default)]
    pub scripts: ScriptsConfig,
}

/// Schedule of a polling sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll interval in seconds (default: 60).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Random delay added to each interval, in seconds (default: 5).
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            jitter_secs: default_jitter(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }
}

/// Settings of a signal-driven sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Script sensor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the scripts (default: `<config dir>/hassagent/scripts`).
    #[serde(default = "default_scripts_path")]
    pub path: PathBuf,

    /// Longest a single run may take before it is killed, in seconds (default: 30).
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_scripts_path(),
            timeout_secs: default_script_timeout(),
        }
    }
}

impl ScriptsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_scripts_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hassagent")
        .join("scripts")
}

fn default_script_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_jitter() -> u64 {
    5
}

/// Network interface filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(flatten)]
    pub poll: PollConfig,

    /// Only include these interfaces (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these interfaces.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Exclude loopback interfaces (default: true).
    #[serde(default = "default_true")]
    pub exclude_loopback: bool,

    /// Exclude virtual interfaces (docker, veth, etc.) (default: true).
    #[serde(default = "default_true")]
    pub exclude_virtual: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_loopback: true,
            exclude_virtual: true,
        }
    }
}

impl NetworkConfig {
    /// Check if an interface should be included.
    pub fn should_include(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|i| i == name) {
            return false;
        }

        if self.exclude.iter().any(|e| e == name) {
            return false;
        }

        if self.exclude_loopback && name == "lo" {
            return false;
        }

        if self.exclude_virtual {
            let virtual_prefixes = ["docker", "veth", "br-", "virbr", "vnet", "tun", "tap"];
            if virtual_prefixes.iter().any(|p| name.starts_with(p)) {
                return false;
            }
        }

        true
    }
}

/// Disk mount filtering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(flatten)]
    pub poll: PollConfig,

    /// Only include these mount points (empty = include all).
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude these mount points.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Exclude pseudo filesystems (tmpfs, devtmpfs, etc.) (default: true).
    #[serde(default = "default_true")]
    pub exclude_pseudo: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_pseudo: true,
        }
    }
}

impl DiskConfig {
    /// Check if a mount point should be included.
    pub fn should_include(&self, mount_point: &str, fs_type: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|i| i == mount_point) {
            return false;
        }

        if self.exclude.iter().any(|e| e == mount_point) {
            return false;
        }

        if self.exclude_pseudo {
            let pseudo_types = [
                "tmpfs",
                "devtmpfs",
                "devfs",
                "sysfs",
                "proc",
                "cgroup",
                "cgroup2",
                "securityfs",
                "debugfs",
                "configfs",
                "fusectl",
                "hugetlbfs",
                "mqueue",
                "pstore",
                "binfmt_misc",
                "autofs",
                "overlay",
                "squashfs",
                "efivarfs",
                "tracefs",
            ];
            if pseudo_types.contains(&fs_type) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hassagent_framework::{Format, ZenohMode};

    #[test]
    fn test_parse_minimal_config() {
        let config = LinuxAgentConfig::parse("{}").unwrap();
        assert_eq!(config.agent.key_prefix, "hassagent");
        assert!(config.sensors.disk.poll.enabled);
        assert_eq!(config.sensors.disk.poll.interval_secs, 60);
        assert_eq!(config.sensors.memory.jitter_secs, 5);
        assert!(config.sensors.battery.enabled);
        assert!(config.sensors.network.exclude_loopback);
        assert!(config.sensors.scripts.enabled);
        assert!(config.sensors.scripts.path.ends_with("hassagent/scripts"));
        assert_eq!(config.sensors.scripts.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/10.0.0.1:7447"] },
            logging: { level: "debug", format: "json" },
            agent: {
                key_prefix: "home/agents",
                device_name: "laptop",
                format: "cbor",
                dispatch: { queue_capacity: 64, workers: 2 },
            },
            sensors: {
                disk: { interval_secs: 120, jitter_secs: 10, exclude: ["/boot"] },
                network: { enabled: false },
                memory: { interval_secs: 30 },
                battery: { enabled: true },
                session: { enabled: false },
                scripts: { path: "/opt/hassagent/scripts", timeout_secs: 5 },
            },
        }"#;

        let config = LinuxAgentConfig::parse(json).unwrap();
        assert_eq!(config.zenoh.mode, ZenohMode::Client);
        assert_eq!(config.agent.format, Format::Cbor);
        assert_eq!(config.agent.dispatch.workers, 2);
        assert_eq!(config.sensors.disk.poll.interval(), Duration::from_secs(120));
        assert_eq!(config.sensors.disk.poll.jitter(), Duration::from_secs(10));
        assert_eq!(config.sensors.disk.exclude, vec!["/boot"]);
        assert!(!config.sensors.network.poll.enabled);
        assert_eq!(config.sensors.memory.interval_secs, 30);
        assert!(!config.sensors.session.enabled);
        assert_eq!(config.sensors.scripts.path, PathBuf::from("/opt/hassagent/scripts"));
        assert_eq!(config.sensors.scripts.timeout_secs, 5);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = LinuxAgentConfig::parse(include_str!("../../hassagent.json5")).unwrap();
        assert_eq!(config.agent.dispatch.queue_capacity, 256);
        assert!(config.sensors.disk.exclude.contains(&"/boot".to_string()));
    }

    #[test]
    fn test_validate_zero_interval() {
        let result = LinuxAgentConfig::parse("{ sensors: { memory: { interval_secs: 0 } } }");
        assert!(matches!(result, Err(AgentError::ConfigValidation(_))));

        // A disabled sensor may keep a zero interval.
        let result = LinuxAgentConfig::parse(
            "{ sensors: { memory: { enabled: false, interval_secs: 0 } } }",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_no_sensors() {
        let json = r#"{
            sensors: {
                disk: { enabled: false },
                network: { enabled: false },
                memory: { enabled: false },
                battery: { enabled: false },
                session: { enabled: false },
                scripts: { enabled: false },
            }
        }"#;
        assert!(LinuxAgentConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_scripts() {
        let result = LinuxAgentConfig::parse(r#"{ sensors: { scripts: { path: "" } } }"#);
        assert!(matches!(result, Err(AgentError::ConfigValidation(_))));

        let result = LinuxAgentConfig::parse("{ sensors: { scripts: { timeout_secs: 0 } } }");
        assert!(matches!(result, Err(AgentError::ConfigValidation(_))));
    }

    #[test]
    fn test_network_filter() {
        let config = NetworkConfig {
            exclude: vec!["wlan1".to_string()],
            ..Default::default()
        };

        assert!(config.should_include("eth0"));
        assert!(config.should_include("wlan0"));
        assert!(!config.should_include("wlan1"));
        assert!(!config.should_include("lo"));
        assert!(!config.should_include("docker0"));
        assert!(!config.should_include("veth123"));
    }

    #[test]
    fn test_disk_filter() {
        let config = DiskConfig {
            exclude: vec!["/boot".to_string()],
            ..Default::default()
        };

        assert!(config.should_include("/", "ext4"));
        assert!(config.should_include("/home", "btrfs"));
        assert!(!config.should_include("/boot", "vfat"));
        assert!(!config.should_include("/run", "tmpfs"));
        assert!(!config.should_include("/snap/core/1", "squashfs"));
    }
}
