//! Network traffic per interface.

use std::time::Instant;

use sysinfo::Networks;
use tokio::sync::mpsc;

use hassagent_common::{DeviceClass, StateClass, sanitize_key};
use hassagent_framework::{BoxedUpdate, Sensor, Shutdown, poll_with_jitter, spawn_poller};

use crate::config::NetworkConfig;

/// Byte counters of one interface.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceTraffic {
    pub interface: String,
    /// Bytes received since the previous sample.
    pub received: u64,
    /// Bytes transmitted since the previous sample.
    pub transmitted: u64,
    pub total_received: u64,
    pub total_transmitted: u64,
}

impl InterfaceTraffic {
    /// Rate and total sensors, with rates averaged over `elapsed_secs`.
    ///
    /// Rates are omitted on the first sample (`elapsed_secs` of zero).
    pub fn sensors(&self, elapsed_secs: f64) -> Vec<Sensor> {
        let key = sanitize_key(&self.interface);
        let mut sensors = Vec::with_capacity(4);

        if elapsed_secs > 0.0 {
            for (dir, bytes, icon) in [
                ("rx", self.received, "mdi:download-network"),
                ("tx", self.transmitted, "mdi:upload-network"),
            ] {
                sensors.push(
                    Sensor::new(
                        format!("network_{key}_{dir}_rate"),
                        format!("{} {} Rate", self.interface, direction(dir)),
                        rate(bytes, elapsed_secs).into(),
                    )
                    .with_unit("B/s")
                    .with_icon(icon)
                    .with_device_class(DeviceClass::DataRate)
                    .with_state_class(StateClass::Measurement)
                    .with_attribute("interface", self.interface.clone()),
                );
            }
        }

        for (dir, bytes) in [("rx", self.total_received), ("tx", self.total_transmitted)] {
            sensors.push(
                Sensor::new(
                    format!("network_{key}_{dir}_total"),
                    format!("{} {} Total", self.interface, direction(dir)),
                    bytes.into(),
                )
                .with_unit("B")
                .with_icon("mdi:network")
                .with_device_class(DeviceClass::DataSize)
                .with_state_class(StateClass::TotalIncreasing)
                .with_attribute("interface", self.interface.clone()),
            );
        }

        sensors
    }
}

fn direction(dir: &str) -> &'static str {
    if dir == "rx" { "Received" } else { "Transmitted" }
}

fn rate(bytes: u64, elapsed_secs: f64) -> f64 {
    (bytes as f64 / elapsed_secs * 100.0).round() / 100.0
}

/// Samples interface counters, remembering when it last did.
struct Sampler {
    networks: Networks,
    last: Option<Instant>,
    config: NetworkConfig,
}

impl Sampler {
    fn collect(&mut self) -> Vec<BoxedUpdate> {
        self.networks.refresh(true);
        let now = Instant::now();
        let elapsed = self
            .last
            .replace(now)
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(0.0);

        let mut updates = Vec::new();
        for (name, data) in self.networks.list() {
            if !self.config.should_include(name) {
                continue;
            }

            let traffic = InterfaceTraffic {
                interface: name.clone(),
                received: data.received(),
                transmitted: data.transmitted(),
                total_received: data.total_received(),
                total_transmitted: data.total_transmitted(),
            };
            updates.extend(traffic.sensors(elapsed).into_iter().map(Sensor::boxed));
        }
        updates
    }
}

/// Poll interface counters until shutdown.
pub fn spawn(config: NetworkConfig, shutdown: Shutdown) -> mpsc::Receiver<BoxedUpdate> {
    let timer = poll_with_jitter(config.poll.interval(), config.poll.jitter());
    let mut sampler = Sampler {
        networks: Networks::new_with_refreshed_list(),
        last: None,
        config,
    };

    spawn_poller("network", shutdown, timer, move || sampler.collect())
}
