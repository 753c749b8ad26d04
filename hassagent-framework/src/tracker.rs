//! Registry of the latest state of every sensor.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use hassagent_common::{BoxedUpdate, Sensor};

use crate::dispatch::{DispatchQueue, Job};

/// Keeps the last reported state of each sensor and forwards changes to the
/// dispatch queue.
///
/// The first update of a sensor id queues a registration, later ones queue
/// state updates. Sensors are never removed.
#[derive(Debug)]
pub struct Tracker {
    sensors: RwLock<HashMap<String, Sensor>>,
    queue: DispatchQueue,
}

impl Tracker {
    pub fn new(queue: DispatchQueue) -> Self {
        Self {
            sensors: RwLock::new(HashMap::new()),
            queue,
        }
    }

    /// Record an update and queue it for the remote side.
    ///
    /// Dispatch failures are logged, never returned: the registry is updated
    /// either way. The job is sent while the registry lock is held, so jobs
    /// of one sensor reach the queue in registry order even when updates
    /// race.
    pub async fn update(&self, update: BoxedUpdate) {
        let sensor = Sensor::from_update(update.as_ref());

        let slot = match self.queue.reserve(&sensor.id).await {
            Ok(slot) => Some(slot),
            Err(e) => {
                debug!(sensor = %sensor.id, error = %e, "Sensor update not dispatched");
                None
            }
        };

        let mut sensors = self.sensors.write();
        let job = match sensors.insert(sensor.id.clone(), sensor.clone()) {
            None => {
                debug!(sensor = %sensor.id, name = %sensor.name, "New sensor");
                Job::Register(sensor)
            }
            Some(_) => Job::Update(sensor),
        };
        if let Some(slot) = slot {
            slot.send(job);
        }
    }

    /// Latest state of a sensor.
    pub fn get(&self, id: &str) -> Option<Sensor> {
        self.sensors.read().get(id).cloned()
    }

    /// Sorted ids of every known sensor.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sensors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.read().is_empty()
    }

    pub(crate) fn close_queue(&self) {
        self.queue.close();
    }

    /// Apply every update of `stream` until it closes, then close the
    /// dispatch queue.
    pub async fn consume(&self, mut stream: mpsc::Receiver<BoxedUpdate>) {
        let mut count = 0u64;
        while let Some(update) = stream.recv().await {
            self.update(update).await;
            count += 1;
        }

        info!(updates = count, sensors = self.len(), "Sensor stream closed");
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hassagent_common::{SensorValue, ShutdownTrigger};
    use parking_lot::Mutex;

    use crate::config::DispatchConfig;
    use crate::dispatch::{Dispatcher, RemoteSink};
    use crate::error::Result;

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<(&'static str, String)>>,
    }

    impl RemoteSink for Recorder {
        async fn register(&self, sensor: &Sensor) -> Result<()> {
            self.jobs.lock().push(("register", sensor.id.clone()));
            Ok(())
        }

        async fn update(&self, sensor: &Sensor) -> Result<()> {
            self.jobs.lock().push(("update", sensor.id.clone()));
            Ok(())
        }
    }

    fn reading(id: &str, value: f64) -> BoxedUpdate {
        Sensor::new(id, id, SensorValue::Number(value)).boxed()
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let sink = Arc::new(Recorder::default());
        let (queue, dispatcher) = Dispatcher::start(sink.clone(), &DispatchConfig::default(), shutdown);
        let tracker = Tracker::new(queue);

        tracker.update(reading("memory", 40.0)).await;
        tracker.update(reading("memory", 41.5)).await;
        tracker.update(reading("swap", 3.0)).await;

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.list(), vec!["memory", "swap"]);
        assert_eq!(tracker.get("memory").unwrap().value, SensorValue::Number(41.5));
        assert!(tracker.get("cpu").is_none());

        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        tracker.consume(rx).await;
        dispatcher.join().await;

        let jobs = sink.jobs.lock();
        let memory: Vec<&str> = jobs
            .iter()
            .filter(|(_, id)| id == "memory")
            .map(|(kind, _)| *kind)
            .collect();
        assert_eq!(memory, vec!["register", "update"]);
        assert_eq!(jobs.iter().filter(|(kind, _)| *kind == "register").count(), 2);
    }

    #[tokio::test]
    async fn test_updates_survive_closed_queue() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let (queue, dispatcher) =
            Dispatcher::start(Arc::new(Recorder::default()), &DispatchConfig::default(), shutdown);
        queue.close();
        dispatcher.join().await;

        let tracker = Tracker::new(queue);
        tracker.update(reading("disk_root", 42.5)).await;
        assert_eq!(tracker.get("disk_root").unwrap().value, SensorValue::Number(42.5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_updates_register_first() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let sink = Arc::new(Recorder::default());
        let config = DispatchConfig {
            queue_capacity: 64,
            workers: 4,
        };
        let (queue, dispatcher) = Dispatcher::start(sink.clone(), &config, shutdown);
        let tracker = Arc::new(Tracker::new(queue));

        let mut tasks = Vec::new();
        for i in 0..1000 {
            for value in [1.0, 2.0] {
                let tracker = tracker.clone();
                tasks.push(tokio::spawn(async move {
                    tracker.update(reading(&format!("sensor_{i}"), value)).await;
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }
        tracker.close_queue();
        dispatcher.join().await;

        let mut seen: HashMap<String, Vec<&'static str>> = HashMap::new();
        for (kind, id) in sink.jobs.lock().iter() {
            seen.entry(id.clone()).or_default().push(*kind);
        }
        assert_eq!(seen.len(), 1000);
        for (id, kinds) in seen {
            assert_eq!(kinds, vec!["register", "update"], "jobs of {id}");
        }
    }
}
