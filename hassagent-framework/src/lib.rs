//! hassagent Agent Framework
//!
//! The sensor pipeline and the lifecycle scaffolding of the agent binary.
//!
//! # Overview
//!
//! Producers emit [`SensorUpdate`]s on channels. The pipeline merges them
//! ([`merge`]), records the latest state of every sensor ([`Tracker`]) and
//! hands registrations and state changes to a bounded worker pool
//! ([`Dispatcher`]) that reports them through a [`RemoteSink`].
//!
//! This framework also provides:
//! - [`AgentConfig`] trait for configuration loading and validation
//! - [`AgentRunner`] for managing the agent lifecycle (startup, shutdown, signal handling)
//! - [`BusRegistry`] for sharing one D-Bus connection per bus
//! - [`spawn_poller`] for interval-driven producers with jitter
//! - [`Publisher`], [`ZenohSink`] and [`StatusPublisher`] for Zenoh output
//! - [`AgentArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use hassagent_framework::{AgentArgs, AgentConfig, AgentRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = AgentArgs::parse_with_default("hassagent.json5");
//!     let config = MyAgentConfig::load(&args.config)?;
//!
//!     let mut runner = AgentRunner::new_with_args("hassagent", config, Some(&args)).await?;
//!     runner.add_producer(my_producer(runner.shutdown()));
//!
//!     // Run until Ctrl+C or SIGTERM
//!     runner.with_status_publishing().run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod dispatch;
mod error;
mod merge;
mod pipeline;
mod poll;
mod publisher;
mod registry;
mod runner;
mod status;
mod tracker;

pub use args::AgentArgs;
pub use config::{AgentConfig, AgentSettings, DispatchConfig};
pub use dispatch::{DispatchQueue, Dispatcher, Job, JobSlot, RemoteSink, ZenohSink};
pub use error::{AgentError, Result};
pub use merge::{MERGE_BUFFER, merge, merge_with_capacity};
pub use pipeline::{Pipeline, RunningPipeline};
pub use poll::{POLL_BUFFER, PollTimer, poll_with_jitter, spawn_poller};
pub use publisher::Publisher;
pub use registry::BusRegistry;
pub use runner::AgentRunner;
pub use status::{AgentStatus, StatusPublisher};
pub use tracker::Tracker;

// Re-export commonly used types from hassagent-common
pub use hassagent_common::{
    BoxedUpdate, DeviceInfo, Format, LoggingConfig, Sensor, SensorUpdate, SensorValue, Shutdown,
    ShutdownTrigger, ZenohConfig, ZenohMode,
};
