//! Memory and swap usage.

use sysinfo::System;
use tokio::sync::mpsc;

use hassagent_common::{DeviceClass, StateClass};
use hassagent_framework::{BoxedUpdate, Sensor, Shutdown, poll_with_jitter, spawn_poller};

use crate::config::PollConfig;

/// Raw memory counters in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

impl MemoryStats {
    fn read(system: &mut System) -> Self {
        system.refresh_memory();
        Self {
            total: system.total_memory(),
            used: system.used_memory(),
            available: system.available_memory(),
            swap_total: system.total_swap(),
            swap_used: system.used_swap(),
        }
    }

    /// Sensors for these counters. Swap is only reported when configured.
    pub fn sensors(&self) -> Vec<Sensor> {
        let mut sensors = vec![
            Sensor::new("memory_usage", "Memory Usage", percent(self.used, self.total).into())
                .with_unit("%")
                .with_icon("mdi:memory")
                .with_state_class(StateClass::Measurement),
            bytes("memory_used", "Memory Used", self.used),
            bytes("memory_available", "Memory Available", self.available),
        ];

        if self.swap_total > 0 {
            sensors.push(
                Sensor::new(
                    "swap_usage",
                    "Swap Usage",
                    percent(self.swap_used, self.swap_total).into(),
                )
                .with_unit("%")
                .with_icon("mdi:swap-horizontal")
                .with_state_class(StateClass::Measurement),
            );
            sensors.push(bytes("swap_used", "Swap Used", self.swap_used));
        }

        sensors
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = part as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

fn bytes(id: &str, name: &str, value: u64) -> Sensor {
    Sensor::new(id, name, value.into())
        .with_unit("B")
        .with_icon("mdi:memory")
        .with_device_class(DeviceClass::DataSize)
        .with_state_class(StateClass::Measurement)
}

/// Poll memory usage until shutdown.
pub fn spawn(config: &PollConfig, shutdown: Shutdown) -> mpsc::Receiver<BoxedUpdate> {
    let timer = poll_with_jitter(config.interval(), config.jitter());
    let mut system = System::new();

    spawn_poller("memory", shutdown, timer, move || {
        MemoryStats::read(&mut system)
            .sensors()
            .into_iter()
            .map(Sensor::boxed)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hassagent_framework::SensorValue;

    #[test]
    fn test_sensors_without_swap() {
        let stats = MemoryStats {
            total: 8000,
            used: 2000,
            available: 6000,
            ..Default::default()
        };

        let sensors = stats.sensors();
        let ids: Vec<&str> = sensors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["memory_usage", "memory_used", "memory_available"]);
        assert_eq!(sensors[0].value, SensorValue::Number(25.0));
        assert_eq!(sensors[1].value, SensorValue::Integer(2000));
        assert_eq!(sensors[1].device_class, Some(DeviceClass::DataSize));
    }

    #[test]
    fn test_sensors_with_swap() {
        let stats = MemoryStats {
            total: 3,
            used: 1,
            available: 2,
            swap_total: 1000,
            swap_used: 250,
        };

        let sensors = stats.sensors();
        assert_eq!(sensors.len(), 5);
        assert_eq!(sensors[0].value, SensorValue::Number(33.33));
        assert_eq!(sensors[3].id, "swap_usage");
        assert_eq!(sensors[3].value, SensorValue::Number(25.0));
    }

    #[test]
    fn test_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
    }
}
