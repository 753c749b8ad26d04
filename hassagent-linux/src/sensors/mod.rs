//! Sensor producers.
//!
//! Every producer returns the receiving end of its update stream. Polling
//! producers run on [`spawn_poller`](hassagent_framework::spawn_poller);
//! bus-backed producers read initial state and then follow
//! `PropertiesChanged` signals. Script sensors run user scripts on the
//! schedule each script declares.

pub mod battery;
pub mod disk;
pub mod memory;
pub mod network;
pub mod scripts;
pub mod session;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use hassagent_framework::{BoxedUpdate, BusRegistry, Shutdown};

use crate::config::SensorsConfig;

/// Buffer of a signal-driven producer's output stream.
pub(crate) const WATCH_BUFFER: usize = 16;

/// Start every enabled producer.
pub fn start(
    config: &SensorsConfig,
    shutdown: Shutdown,
    buses: Arc<BusRegistry>,
) -> Vec<mpsc::Receiver<BoxedUpdate>> {
    let mut producers = Vec::new();

    if config.disk.poll.enabled {
        producers.push(disk::spawn(config.disk.clone(), shutdown.clone()));
    }
    if config.network.poll.enabled {
        producers.push(network::spawn(config.network.clone(), shutdown.clone()));
    }
    if config.memory.enabled {
        producers.push(memory::spawn(&config.memory, shutdown.clone()));
    }
    if config.battery.enabled {
        producers.push(battery::spawn(shutdown.clone(), buses.clone()));
    }
    if config.session.enabled {
        producers.push(session::spawn(shutdown.clone(), buses));
    }
    if config.scripts.enabled {
        producers.push(scripts::spawn(config.scripts.clone(), shutdown));
    }

    info!(producers = producers.len(), "Started sensor producers");
    producers
}

/// Send `updates` in order, giving up when `shutdown` fires or the stream is gone.
///
/// Returns `false` if the caller should stop producing.
pub(crate) async fn send_all(
    tx: &mpsc::Sender<BoxedUpdate>,
    updates: Vec<BoxedUpdate>,
    shutdown: &Shutdown,
) -> bool {
    for update in updates {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return false,
            sent = tx.send(update) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}
