//! Delivery of sensor registrations and states to the remote side.
//!
//! The tracker never talks to the remote side directly. It pushes [`Job`]s
//! onto a bounded [`DispatchQueue`] drained by a fixed pool of workers, each
//! calling the [`RemoteSink`]. Jobs are sharded by sensor id, so the jobs of
//! one sensor are delivered in order (its registration always first) while
//! different sensors proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use hassagent_common::{Sensor, Shutdown, sanitize_key};

use crate::config::DispatchConfig;
use crate::error::{AgentError, Result};
use crate::publisher::Publisher;

/// The remote API the agent reports to.
pub trait RemoteSink: Send + Sync + 'static {
    /// Announce a sensor seen for the first time.
    fn register(&self, sensor: &Sensor) -> impl Future<Output = Result<()>> + Send;

    /// Report the new state of a known sensor.
    fn update(&self, sensor: &Sensor) -> impl Future<Output = Result<()>> + Send;
}

/// One unit of work for the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Register(Sensor),
    Update(Sensor),
}

impl Job {
    pub fn sensor(&self) -> &Sensor {
        match self {
            Job::Register(sensor) | Job::Update(sensor) => sensor,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Register(_) => "register",
            Job::Update(_) => "update",
        }
    }
}

/// Producer side of the dispatch queue.
///
/// Clones share the same lanes; [`close`](Self::close) closes them for every clone.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    lanes: Arc<Mutex<Option<Vec<mpsc::Sender<Job>>>>>,
    shutdown: Shutdown,
}

impl DispatchQueue {
    /// Queue a job, waiting for capacity if the worker's lane is full.
    ///
    /// The wait is abandoned, and the job dropped, when shutdown fires.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        self.reserve(&job.sensor().id).await?.send(job);
        Ok(())
    }

    /// Reserve room for one job of sensor `id` on its lane.
    ///
    /// Jobs sent through slots land on the lane in the order the slots are
    /// used, not the order they were reserved in, which lets a caller decide
    /// the job under its own lock. The wait for capacity is abandoned when
    /// shutdown fires.
    pub async fn reserve(&self, id: &str) -> Result<JobSlot> {
        let lane = match self.lane_for(id)?.try_reserve_owned() {
            Ok(permit) => return Ok(JobSlot { permit }),
            Err(TrySendError::Closed(_)) => return Err(AgentError::dispatch("dispatch queue closed")),
            Err(TrySendError::Full(lane)) => lane,
        };

        trace!(sensor = %id, "Dispatch lane full, waiting");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(AgentError::dispatch(format!(
                "shutting down, dropped job of '{id}'"
            ))),
            permit = lane.reserve_owned() => permit
                .map(|permit| JobSlot { permit })
                .map_err(|_| AgentError::dispatch("dispatch queue closed")),
        }
    }

    /// Stop accepting jobs. Workers exit once they drained what is queued.
    pub fn close(&self) {
        if self.lanes.lock().take().is_some() {
            debug!("Dispatch queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.lock().is_none()
    }

    fn lane_for(&self, id: &str) -> Result<mpsc::Sender<Job>> {
        let lanes = self.lanes.lock();
        let lanes = lanes
            .as_ref()
            .ok_or_else(|| AgentError::dispatch("dispatch queue closed"))?;

        debug_assert!(!lanes.is_empty());
        if lanes.is_empty() {
            return Err(AgentError::dispatch("dispatch queue has no workers"));
        }

        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        Ok(lanes[(hasher.finish() % lanes.len() as u64) as usize].clone())
    }
}

/// Capacity reserved on one dispatch lane.
#[derive(Debug)]
pub struct JobSlot {
    permit: mpsc::OwnedPermit<Job>,
}

impl JobSlot {
    /// Put the job on the lane. Never waits.
    pub fn send(self, job: Job) {
        self.permit.send(job);
    }
}

/// Worker pool draining a [`DispatchQueue`].
#[derive(Debug)]
pub struct Dispatcher {
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the workers and return the queue feeding them.
    pub fn start<S: RemoteSink>(
        sink: Arc<S>,
        config: &DispatchConfig,
        shutdown: Shutdown,
    ) -> (DispatchQueue, Dispatcher) {
        let workers = config.workers.max(1);
        let lane_capacity = (config.queue_capacity / workers).max(1);

        let mut lanes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(lane_capacity);
            lanes.push(tx);
            handles.push(tokio::spawn(run_worker(id, sink.clone(), rx)));
        }

        debug!(workers, lane_capacity, "Started dispatch workers");

        let queue = DispatchQueue {
            lanes: Arc::new(Mutex::new(Some(lanes))),
            shutdown,
        };
        (queue, Dispatcher { workers: handles })
    }

    /// Wait for every worker to exit. Only returns once the queue is closed.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatch worker panicked");
            }
        }
        debug!("Dispatch workers stopped");
    }
}

async fn run_worker<S: RemoteSink>(id: usize, sink: Arc<S>, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        let sensor = job.sensor();
        let result = match &job {
            Job::Register(sensor) => sink.register(sensor).await,
            Job::Update(sensor) => sink.update(sensor).await,
        };

        match result {
            Ok(()) => trace!(worker = id, sensor = %sensor.id, job = job.kind(), "Dispatched"),
            Err(e) => warn!(
                worker = id,
                sensor = %sensor.id,
                job = job.kind(),
                error = %e,
                "Failed to send sensor"
            ),
        }
    }
}

/// [`RemoteSink`] publishing sensors over Zenoh.
///
/// Registrations go to `<prefix>/sensor/<id>/register` and states to
/// `<prefix>/sensor/<id>/state`, encoded with the publisher's format.
#[derive(Debug, Clone)]
pub struct ZenohSink {
    publisher: Publisher,
}

impl ZenohSink {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

pub(crate) fn sensor_key(id: &str, kind: &str) -> String {
    format!("sensor/{}/{}", sanitize_key(id), kind)
}

impl RemoteSink for ZenohSink {
    async fn register(&self, sensor: &Sensor) -> Result<()> {
        self.publisher
            .publish(&sensor_key(&sensor.id, "register"), sensor)
            .await
    }

    async fn update(&self, sensor: &Sensor) -> Result<()> {
        self.publisher
            .publish(&sensor_key(&sensor.id, "state"), sensor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hassagent_common::{SensorValue, ShutdownTrigger};

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<(String, String, SensorValue)>>,
    }

    impl RemoteSink for Recorder {
        async fn register(&self, sensor: &Sensor) -> Result<()> {
            self.jobs
                .lock()
                .push(("register".into(), sensor.id.clone(), sensor.value.clone()));
            Ok(())
        }

        async fn update(&self, sensor: &Sensor) -> Result<()> {
            self.jobs
                .lock()
                .push(("update".into(), sensor.id.clone(), sensor.value.clone()));
            Ok(())
        }
    }

    struct Failing;

    impl RemoteSink for Failing {
        async fn register(&self, sensor: &Sensor) -> Result<()> {
            Err(AgentError::Publish {
                key: sensor.id.clone(),
                message: "unreachable".to_string(),
            })
        }

        async fn update(&self, sensor: &Sensor) -> Result<()> {
            self.register(sensor).await
        }
    }

    fn sensor(id: &str, value: f64) -> Sensor {
        Sensor::new(id, id, SensorValue::Number(value))
    }

    #[test]
    fn test_sensor_key() {
        assert_eq!(sensor_key("battery_BAT0", "state"), "sensor/battery_BAT0/state");
        assert_eq!(sensor_key("mount /home", "register"), "sensor/mount_home/register");
    }

    #[tokio::test]
    async fn test_jobs_of_one_sensor_stay_ordered() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let sink = Arc::new(Recorder::default());
        let config = DispatchConfig {
            queue_capacity: 8,
            workers: 4,
        };
        let (queue, dispatcher) = Dispatcher::start(sink.clone(), &config, shutdown);

        queue.enqueue(Job::Register(sensor("cpu", 1.0))).await.unwrap();
        for i in 2..=20 {
            queue.enqueue(Job::Update(sensor("cpu", i as f64))).await.unwrap();
        }
        queue.close();
        dispatcher.join().await;

        let jobs = sink.jobs.lock();
        assert_eq!(jobs.len(), 20);
        assert_eq!(jobs[0].0, "register");
        let values: Vec<f64> = jobs.iter().filter_map(|(_, _, v)| v.as_f64()).collect();
        assert_eq!(values, (1..=20).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_jobs() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let (queue, dispatcher) =
            Dispatcher::start(Arc::new(Recorder::default()), &DispatchConfig::default(), shutdown);

        queue.close();
        assert!(queue.is_closed());
        let result = queue.enqueue(Job::Update(sensor("cpu", 1.0))).await;
        assert!(matches!(result, Err(AgentError::Dispatch(_))));

        dispatcher.join().await;
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_stop_workers() {
        let (_trigger, shutdown) = ShutdownTrigger::new();
        let (queue, dispatcher) = Dispatcher::start(
            Arc::new(Failing),
            &DispatchConfig {
                queue_capacity: 1,
                workers: 1,
            },
            shutdown,
        );

        for i in 0..5 {
            queue.enqueue(Job::Update(sensor("disk", i as f64))).await.unwrap();
        }
        queue.close();
        dispatcher.join().await;
    }

    #[tokio::test]
    async fn test_shutdown_abandons_wait_for_capacity() {
        let (trigger, shutdown) = ShutdownTrigger::new();

        struct Stuck;
        impl RemoteSink for Stuck {
            async fn register(&self, _sensor: &Sensor) -> Result<()> {
                std::future::pending().await
            }
            async fn update(&self, _sensor: &Sensor) -> Result<()> {
                std::future::pending().await
            }
        }

        let (queue, _dispatcher) = Dispatcher::start(
            Arc::new(Stuck),
            &DispatchConfig {
                queue_capacity: 1,
                workers: 1,
            },
            shutdown,
        );

        // One job is taken by the worker, one fills the lane.
        queue.enqueue(Job::Update(sensor("net", 1.0))).await.unwrap();
        tokio::task::yield_now().await;
        queue.enqueue(Job::Update(sensor("net", 2.0))).await.unwrap();

        let waiting = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(Job::Update(sensor("net", 3.0))).await }
        });
        tokio::task::yield_now().await;
        trigger.trigger();

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(AgentError::Dispatch(_))));
    }
}
