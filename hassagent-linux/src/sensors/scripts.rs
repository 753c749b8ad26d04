//! Sensors reported by user scripts.
//!
//! Every executable file in the scripts directory is a sensor source. A
//! script prints one JSON document on stdout:
//!
//! ```json
//! {
//!   "schedule": "@every 5m",
//!   "sensors": [
//!     {
//!       "sensor_name": "Pending Updates",
//!       "sensor_state": 12,
//!       "sensor_icon": "mdi:package-up",
//!       "sensor_state_class": "measurement"
//!     }
//!   ]
//! }
//! ```
//!
//! The schedule is learned from the first run, whose sensors are reported
//! right away. Scripts that fail their first run or carry no valid schedule
//! are skipped.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hassagent_common::{DeviceClass, SensorType, StateClass};
use hassagent_framework::{BoxedUpdate, Sensor, SensorValue, Shutdown};

use crate::config::ScriptsConfig;

use super::{WATCH_BUFFER, send_all};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to run {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} did not finish within {secs}s")]
    Timeout { path: String, secs: u64 },

    #[error("{path} exited with {status}: {stderr}")]
    Failed {
        path: String,
        status: String,
        stderr: String,
    },

    #[error("invalid output of {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid schedule '{schedule}': {reason}")]
    Schedule { schedule: String, reason: String },
}

/// What a script prints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptOutput {
    #[serde(default)]
    pub schedule: String,

    #[serde(default)]
    pub sensors: Vec<ScriptSensor>,
}

/// One sensor of a script's output.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSensor {
    pub sensor_name: String,

    #[serde(default)]
    pub sensor_state: serde_json::Value,

    #[serde(default)]
    pub sensor_icon: Option<String>,

    #[serde(default)]
    pub sensor_units: Option<String>,

    /// `sensor` (default) or `binary`.
    #[serde(default)]
    pub sensor_type: Option<String>,

    #[serde(default)]
    pub sensor_device_class: Option<String>,

    #[serde(default)]
    pub sensor_state_class: Option<String>,

    #[serde(default)]
    pub sensor_attributes: HashMap<String, serde_json::Value>,
}

impl ScriptSensor {
    pub fn to_sensor(&self) -> Sensor {
        let mut sensor = Sensor::new(
            script_sensor_id(&self.sensor_name),
            self.sensor_name.as_str(),
            state_value(&self.sensor_state),
        );

        if let Some(icon) = &self.sensor_icon {
            sensor = sensor.with_icon(icon.as_str());
        }
        if let Some(units) = &self.sensor_units {
            sensor = sensor.with_unit(units.as_str());
        }
        if matches!(self.sensor_type.as_deref(), Some("binary" | "binary_sensor")) {
            sensor = sensor.with_sensor_type(SensorType::BinarySensor);
        }
        if let Some(class) = self.sensor_device_class.as_deref().and_then(named::<DeviceClass>) {
            sensor = sensor.with_device_class(class);
        }
        if let Some(class) = self.sensor_state_class.as_deref().and_then(named::<StateClass>) {
            sensor = sensor.with_state_class(class);
        }

        sensor.attributes = self.sensor_attributes.clone();
        sensor
            .attributes
            .insert("data_source".to_string(), "script".into());
        sensor
    }
}

/// Decode a snake_case class name, ignoring names this agent does not know.
fn named<T: serde::de::DeserializeOwned>(name: &str) -> Option<T> {
    match serde_json::from_value(serde_json::Value::String(name.to_string())) {
        Ok(class) => Some(class),
        Err(_) => {
            debug!(class = name, "Ignoring unknown sensor class");
            None
        }
    }
}

fn state_value(state: &serde_json::Value) -> SensorValue {
    use serde_json::Value;

    match state {
        Value::Null => SensorValue::Unknown,
        Value::Bool(b) => SensorValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SensorValue::Integer(i),
            None => n.as_f64().map_or(SensorValue::Unknown, SensorValue::Number),
        },
        Value::String(s) => SensorValue::Text(s.clone()),
        other => SensorValue::Text(other.to_string()),
    }
}

/// Sensor id of a script sensor: its name in lower snake case.
pub fn script_sensor_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.is_empty() && !id.ends_with('_') {
            id.push('_');
        }
    }
    id.trim_end_matches('_').to_string()
}

/// When a script runs.
#[derive(Debug, Clone)]
pub enum ScriptSchedule {
    /// `@every <duration>`, e.g. `@every 1m30s`.
    Every(Duration),
    /// A cron expression or one of its `@hourly`-style shortcuts.
    Cron(Box<cron::Schedule>),
}

impl ScriptSchedule {
    /// Time until the next run, `None` when the schedule has no future runs.
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            ScriptSchedule::Every(every) => Some(*every),
            ScriptSchedule::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl FromStr for ScriptSchedule {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| ScriptError::Schedule {
            schedule: s.to_string(),
            reason,
        };

        if s.is_empty() {
            return Err(invalid("no schedule".to_string()));
        }
        if let Some(every) = s.strip_prefix("@every") {
            return parse_every(every.trim()).map(ScriptSchedule::Every).map_err(invalid);
        }

        let expression = match s {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * SUN",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };

        // Five-field expressions have no seconds column.
        let expression = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        cron::Schedule::from_str(&expression)
            .map(|schedule| ScriptSchedule::Cron(Box::new(schedule)))
            .map_err(|e| invalid(e.to_string()))
    }
}

/// Parse durations like `30s`, `5m` or `1h30m`.
fn parse_every(s: &str) -> Result<Duration, String> {
    let mut total = 0u64;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return Err(format!("unknown unit '{c}'")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{c}'"))?;
        total = total.saturating_add(value.saturating_mul(unit));
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("missing unit after '{digits}'"));
    }
    if total == 0 {
        return Err("interval must be positive".to_string());
    }
    Ok(Duration::from_secs(total))
}

/// Executable files directly inside `dir`, sorted by path.
pub async fn find_scripts(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut scripts = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
            scripts.push(path);
        }
    }

    scripts.sort();
    Ok(scripts)
}

/// Run a script once and parse its output. The script is killed on timeout.
pub async fn run_script(path: &Path, timeout: Duration) -> Result<ScriptOutput, ScriptError> {
    let name = path.display().to_string();

    let output = Command::new(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| ScriptError::Timeout {
            path: name.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|source| ScriptError::Spawn {
            path: name.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ScriptError::Failed {
            path: name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| ScriptError::Output { path: name, source })
}

/// Run every script in the configured directory on its schedule until
/// shutdown.
///
/// The stream closes once every script has stopped, right away when the
/// directory is missing or holds no scripts.
pub fn spawn(config: ScriptsConfig, shutdown: Shutdown) -> mpsc::Receiver<BoxedUpdate> {
    let (tx, rx) = mpsc::channel(WATCH_BUFFER);

    tokio::spawn(async move {
        let scripts = match find_scripts(&config.path).await {
            Ok(scripts) => scripts,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %config.path.display(), "No scripts directory");
                return;
            }
            Err(e) => {
                warn!(path = %config.path.display(), error = %e, "Unable to read scripts directory");
                return;
            }
        };

        if scripts.is_empty() {
            debug!(path = %config.path.display(), "No script sensors found");
            return;
        }

        info!(scripts = scripts.len(), path = %config.path.display(), "Starting script sensors");
        for script in scripts {
            tokio::spawn(run_scheduled(script, config.timeout(), tx.clone(), shutdown.clone()));
        }
    });

    rx
}

async fn run_scheduled(
    path: PathBuf,
    timeout: Duration,
    tx: mpsc::Sender<BoxedUpdate>,
    shutdown: Shutdown,
) {
    let script = path.display().to_string();

    let first = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        output = run_script(&path, timeout) => output,
    };
    let output = match first {
        Ok(output) => output,
        Err(e) => {
            warn!(script = %script, error = %e, "Script failed, not scheduling it");
            return;
        }
    };
    let schedule = match output.schedule.parse::<ScriptSchedule>() {
        Ok(schedule) => schedule,
        Err(e) => {
            warn!(script = %script, error = %e, "Unable to schedule script");
            return;
        }
    };
    debug!(script = %script, schedule = %output.schedule, "Added script sensor");

    let mut output = Some(output);
    loop {
        if let Some(output) = output.take() {
            let updates = output.sensors.iter().map(|s| s.to_sensor().boxed()).collect();
            if !send_all(&tx, updates, &shutdown).await {
                break;
            }
        }

        let Some(delay) = schedule.next_delay() else {
            debug!(script = %script, "No further runs scheduled");
            break;
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let run = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            run = run_script(&path, timeout) => run,
        };
        match run {
            Ok(next) => output = Some(next),
            Err(e) => warn!(script = %script, error = %e, "Script failed"),
        }
    }

    debug!(script = %script, "Script sensor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hassagent_framework::ShutdownTrigger;
    use tokio::time::timeout;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_script_sensor_id() {
        assert_eq!(script_sensor_id("Pending Updates"), "pending_updates");
        assert_eq!(script_sensor_id("CPU Temp (°C)"), "cpu_temp_c");
        assert_eq!(script_sensor_id("already_snake"), "already_snake");
    }

    #[test]
    fn test_parse_every() {
        assert_eq!(parse_every("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_every("1h30m"), Ok(Duration::from_secs(5400)));
        assert!(parse_every("10").is_err());
        assert!(parse_every("5d").is_err());
        assert!(parse_every("0s").is_err());
    }

    #[test]
    fn test_parse_schedule() {
        let every: ScriptSchedule = "@every 5m".parse().unwrap();
        assert_eq!(every.next_delay(), Some(Duration::from_secs(300)));

        for cron in ["@hourly", "@daily", "@weekly", "*/5 * * * *", "0 30 9 * * *"] {
            let schedule: ScriptSchedule = cron.parse().unwrap();
            let delay = schedule.next_delay().unwrap();
            assert!(delay <= Duration::from_secs(8 * 24 * 3600), "{cron}");
        }

        assert!("".parse::<ScriptSchedule>().is_err());
        assert!("every minute".parse::<ScriptSchedule>().is_err());
    }

    #[test]
    fn test_output_to_sensors() {
        let output: ScriptOutput = serde_json::from_str(
            r#"{
                "schedule": "@every 1m",
                "sensors": [
                    {
                        "sensor_name": "Pending Updates",
                        "sensor_state": 12,
                        "sensor_icon": "mdi:package-up",
                        "sensor_state_class": "measurement",
                        "sensor_attributes": { "repo": "main" }
                    },
                    {
                        "sensor_name": "VPN Up",
                        "sensor_state": true,
                        "sensor_type": "binary",
                        "sensor_device_class": "connectivity"
                    },
                    { "sensor_name": "Load", "sensor_state": 0.75, "sensor_units": "%" }
                ]
            }"#,
        )
        .unwrap();

        let sensors: Vec<Sensor> = output.sensors.iter().map(ScriptSensor::to_sensor).collect();

        assert_eq!(sensors[0].id, "pending_updates");
        assert_eq!(sensors[0].value, SensorValue::Integer(12));
        assert_eq!(sensors[0].icon.as_deref(), Some("mdi:package-up"));
        assert_eq!(sensors[0].state_class, Some(StateClass::Measurement));
        assert_eq!(sensors[0].attributes["repo"], "main");
        assert_eq!(sensors[0].attributes["data_source"], "script");

        assert_eq!(sensors[1].value, SensorValue::Boolean(true));
        assert_eq!(sensors[1].sensor_type, SensorType::BinarySensor);
        assert_eq!(sensors[1].device_class, None);

        assert_eq!(sensors[2].value, SensorValue::Number(0.75));
        assert_eq!(sensors[2].unit, "%");
    }

    #[tokio::test]
    async fn test_find_scripts_skips_non_executables() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "b.sh", "true");
        write_script(dir.path(), "a.sh", "true");
        std::fs::write(dir.path().join("notes.txt"), "not a script").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();

        let scripts = find_scripts(dir.path()).await.unwrap();
        assert_eq!(scripts, vec![dir.path().join("a.sh"), dir.path().join("b.sh")]);

        assert!(find_scripts(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_run_script() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_script(
            dir.path(),
            "ok.sh",
            r#"echo '{"schedule": "@every 1s", "sensors": [{"sensor_name": "Answer", "sensor_state": 42}]}'"#,
        );
        let output = run_script(&ok, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.schedule, "@every 1s");
        assert_eq!(output.sensors[0].to_sensor().value, SensorValue::Integer(42));

        let failing = write_script(dir.path(), "fail.sh", "echo broken >&2; exit 3");
        match run_script(&failing, Duration::from_secs(5)).await {
            Err(ScriptError::Failed { stderr, .. }) => assert_eq!(stderr, "broken"),
            other => panic!("expected failure, got {other:?}"),
        }

        let garbage = write_script(dir.path(), "garbage.sh", "echo not json");
        assert!(matches!(
            run_script(&garbage, Duration::from_secs(5)).await,
            Err(ScriptError::Output { .. })
        ));

        let slow = write_script(dir.path(), "slow.sh", "sleep 5");
        assert!(matches!(
            run_script(&slow, Duration::from_millis(200)).await,
            Err(ScriptError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_scripts_report_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "uptime.sh",
            r#"echo '{"schedule": "@every 1s", "sensors": [{"sensor_name": "Script Uptime", "sensor_state": "up"}]}'"#,
        );
        write_script(dir.path(), "unscheduled.sh", r#"echo '{"sensors": []}'"#);

        let (trigger, shutdown) = ShutdownTrigger::new();
        let config = ScriptsConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut rx = spawn(config, shutdown);

        for _ in 0..2 {
            let update = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no script output within 5s")
                .expect("stream closed early");
            assert_eq!(update.id(), "script_uptime");
            assert_eq!(update.value(), SensorValue::Text("up".to_string()));
        }

        trigger.trigger();
        timeout(Duration::from_secs(2), async { while rx.recv().await.is_some() {} })
            .await
            .expect("script stream did not close after shutdown");
    }

    #[tokio::test]
    async fn test_missing_directory_closes_stream() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let config = ScriptsConfig {
            path: PathBuf::from("/nonexistent/hassagent/scripts"),
            ..Default::default()
        };
        let mut rx = spawn(config, shutdown);

        let closed = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
