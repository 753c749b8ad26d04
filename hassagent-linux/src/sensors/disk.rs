//! Disk usage per mount point.

use std::collections::HashMap;

use sysinfo::Disks;
use tokio::sync::mpsc;

use hassagent_common::{StateClass, sensor::SensorUpdate};
use hassagent_framework::{BoxedUpdate, SensorValue, Shutdown, poll_with_jitter, spawn_poller};

use crate::config::DiskConfig;

/// Usage is reported in steps of this many percent.
const USAGE_STEP: f64 = 0.05;

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub mount_point: String,
    pub file_system: String,
    pub device: String,
    pub total: u64,
    pub available: u64,
}

impl DiskUsage {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    /// Used space in percent, rounded to [`USAGE_STEP`].
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round_to_step(self.used() as f64 / self.total as f64 * 100.0, USAGE_STEP)
    }
}

impl SensorUpdate for DiskUsage {
    fn id(&self) -> String {
        mount_id(&self.mount_point)
    }

    fn name(&self) -> String {
        format!("Mountpoint {} Usage", self.mount_point)
    }

    fn value(&self) -> SensorValue {
        SensorValue::Number(self.used_percent())
    }

    fn unit(&self) -> String {
        "%".to_string()
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("data_source".to_string(), "sysinfo".into()),
            ("file_system".to_string(), self.file_system.clone().into()),
            ("device".to_string(), self.device.clone().into()),
            ("total_bytes".to_string(), self.total.into()),
            ("available_bytes".to_string(), self.available.into()),
        ])
    }

    fn icon(&self) -> Option<String> {
        Some("mdi:harddisk".to_string())
    }

    fn state_class(&self) -> Option<StateClass> {
        Some(StateClass::Total)
    }
}

/// Sensor id of a mount point: `mountpoint_root` for `/`, otherwise
/// `mountpoint` followed by the path with every `/` replaced by `_`.
pub fn mount_id(mount_point: &str) -> String {
    if mount_point == "/" {
        "mountpoint_root".to_string()
    } else {
        format!("mountpoint{}", mount_point.replace('/', "_"))
    }
}

/// Round `value` to the nearest multiple of `step`.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    let rounded = (value / step).round() * step;
    // Strip the float noise the multiplication leaves behind.
    (rounded * 100.0).round() / 100.0
}

/// Refresh `disks` and report every included mount.
fn collect(disks: &mut Disks, config: &DiskConfig) -> Vec<BoxedUpdate> {
    disks.refresh(true);

    disks
        .list()
        .iter()
        .filter_map(|disk| {
            let mount_point = disk.mount_point().to_string_lossy().to_string();
            let file_system = disk.file_system().to_string_lossy().to_string();
            if !config.should_include(&mount_point, &file_system) {
                return None;
            }

            let usage = DiskUsage {
                mount_point,
                file_system,
                device: disk.name().to_string_lossy().to_string(),
                total: disk.total_space(),
                available: disk.available_space(),
            };
            Some(Box::new(usage) as BoxedUpdate)
        })
        .collect()
}

/// Poll disk usage until shutdown.
pub fn spawn(config: DiskConfig, shutdown: Shutdown) -> mpsc::Receiver<BoxedUpdate> {
    let timer = poll_with_jitter(config.poll.interval(), config.poll.jitter());
    let mut disks = Disks::new_with_refreshed_list();

    spawn_poller("disk", shutdown, timer, move || collect(&mut disks, &config))
}
