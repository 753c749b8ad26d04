//! Agent runner for lifecycle management.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::mpsc;

use hassagent_common::{
    BoxedUpdate, DeviceInfo, Shutdown, ShutdownTrigger, connect, init_tracing,
};

use crate::AgentArgs;
use crate::config::AgentConfig;
use crate::dispatch::ZenohSink;
use crate::error::{AgentError, Result};
use crate::pipeline::Pipeline;
use crate::publisher::Publisher;
use crate::registry::BusRegistry;
use crate::status::StatusPublisher;
use crate::tracker::Tracker;

/// Agent runner that manages the lifecycle of the agent.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection and device identity
/// - The sensor pipeline and its producers
/// - Shared bus connections
/// - Graceful shutdown on Ctrl+C or SIGTERM
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// use hassagent_framework::{AgentArgs, AgentConfig, AgentRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = AgentArgs::parse_with_default("hassagent.json5");
///     let config = MyAgentConfig::load(&args.config)?;
///
///     let mut runner = AgentRunner::new_with_args("hassagent", config, Some(&args)).await?;
///     runner.add_producer(my_producer(runner.shutdown()));
///
///     runner.with_status_publishing().run().await?;
///     Ok(())
/// }
/// ```
pub struct AgentRunner<C: AgentConfig> {
    /// Agent name for logging and status.
    name: String,
    /// Agent version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Resolved device metadata.
    device: DeviceInfo,
    /// Zenoh session.
    session: Arc<zenoh::Session>,
    /// Publisher rooted at `<key_prefix>/<device>`.
    publisher: Publisher,
    /// Status publisher (optional).
    status_publisher: Option<StatusPublisher>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    buses: Arc<BusRegistry>,
    pipeline: Pipeline,
}

impl<C: AgentConfig> AgentRunner<C> {
    /// Create a new agent runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Resolve the device identity
    /// 3. Connect to Zenoh
    /// 4. Start the dispatch workers
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new agent runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&AgentArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        // Initialize logging with optional CLI override
        let log_config = config
            .logging()
            .with_level_override(args.and_then(|a| a.log_level.as_deref()));

        init_tracing(&log_config).map_err(|e| AgentError::config(e.to_string()))?;

        let device = config.agent().device_info(&version);
        tracing::info!(
            agent = %name,
            version = %version,
            device = %device.name,
            device_id = %device.id,
            "Starting agent"
        );

        // Connect to Zenoh
        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| AgentError::ZenohConnection(e.to_string()))?,
        );

        let prefix = format!("{}/{}", config.agent().key_prefix, device.key());
        let publisher = Publisher::new(session.clone(), prefix, config.agent().format);

        let (trigger, shutdown) = ShutdownTrigger::new();
        let sink = Arc::new(ZenohSink::new(publisher.clone()));
        let pipeline = Pipeline::new(sink, &config.agent().dispatch, shutdown.clone());

        Ok(Self {
            name,
            version,
            device,
            session,
            publisher,
            status_publisher: None,
            buses: Arc::new(BusRegistry::new(shutdown.clone())),
            trigger,
            shutdown,
            pipeline,
            config,
        })
    }

    /// Enable status publishing.
    ///
    /// When enabled, the runner will publish status messages on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            self.device.clone(),
        ));
        self
    }

    /// Get the agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the agent version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// The root shutdown signal; every producer should follow it.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Shared bus connections.
    pub fn buses(&self) -> Arc<BusRegistry> {
        self.buses.clone()
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        self.pipeline.tracker()
    }

    /// Feed a producer stream into the sensor pipeline.
    pub fn add_producer(&mut self, source: mpsc::Receiver<BoxedUpdate>) {
        self.pipeline.add_producer(source);
    }

    /// Run the agent until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Publish "running" status (if enabled)
    /// 2. Start the sensor pipeline
    /// 3. Wait for a termination signal
    /// 4. Fire the shutdown signal and wait for the pipeline and the bus
    ///    connections to wind down
    /// 5. Publish "offline" status (if enabled)
    /// 6. Close the Zenoh session
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the agent with custom status metadata.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        // Publish running status
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            agent = %self.name,
            producers = self.pipeline.producers(),
            "Agent running. Press Ctrl+C to stop."
        );

        let pipeline = self.pipeline.start();

        wait_for_termination().await;

        tracing::info!(agent = %self.name, "Received shutdown signal");
        self.trigger.trigger();

        pipeline.join().await;
        self.buses.wait_closed().await;

        // Publish offline status
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        // Close Zenoh session
        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(agent = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
