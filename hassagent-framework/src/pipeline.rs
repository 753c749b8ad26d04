//! Producers → merger → tracker → dispatch, wired together.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hassagent_common::{BoxedUpdate, Shutdown};

use crate::config::DispatchConfig;
use crate::dispatch::{Dispatcher, RemoteSink};
use crate::merge::merge;
use crate::tracker::Tracker;

/// The sensor pipeline before it starts: collects producer streams.
#[derive(Debug)]
pub struct Pipeline {
    shutdown: Shutdown,
    tracker: Arc<Tracker>,
    dispatcher: Dispatcher,
    sources: Vec<mpsc::Receiver<BoxedUpdate>>,
}

impl Pipeline {
    /// Start the dispatch workers for `sink`. Producers are added afterwards.
    pub fn new<S: RemoteSink>(sink: Arc<S>, config: &DispatchConfig, shutdown: Shutdown) -> Self {
        let (queue, dispatcher) = Dispatcher::start(sink, config, shutdown.clone());

        Self {
            shutdown,
            tracker: Arc::new(Tracker::new(queue)),
            dispatcher,
            sources: Vec::new(),
        }
    }

    /// Add a producer stream.
    pub fn add_producer(&mut self, source: mpsc::Receiver<BoxedUpdate>) {
        self.sources.push(source);
    }

    pub fn producers(&self) -> usize {
        self.sources.len()
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        self.tracker.clone()
    }

    /// Merge the producers and start feeding the tracker.
    pub fn start(self) -> RunningPipeline {
        info!(producers = self.sources.len(), "Starting sensor pipeline");

        let merged = merge(self.shutdown, self.sources);
        let tracker = self.tracker.clone();
        let consumer = tokio::spawn(async move { tracker.consume(merged).await });

        RunningPipeline {
            tracker: self.tracker,
            consumer,
            dispatcher: self.dispatcher,
        }
    }
}

/// A started [`Pipeline`].
#[derive(Debug)]
pub struct RunningPipeline {
    tracker: Arc<Tracker>,
    consumer: JoinHandle<()>,
    dispatcher: Dispatcher,
}

impl RunningPipeline {
    pub fn tracker(&self) -> Arc<Tracker> {
        self.tracker.clone()
    }

    /// Wait for the pipeline to drain.
    ///
    /// Resolves once every producer stream closed (or shutdown fired), the
    /// tracker consumed the merged stream and the dispatch workers exited.
    pub async fn join(self) {
        let Self {
            tracker,
            consumer,
            dispatcher,
        } = self;

        if let Err(e) = consumer.await {
            warn!(error = %e, "Sensor consumer panicked");
            // The consumer normally closes the queue on its way out.
            tracker.close_queue();
        }
        dispatcher.join().await;
    }
}
