//! hassagent Common Library
//!
//! Shared types and utilities for the hassagent desktop telemetry agent:
//!
//! - [`sensor`] - Sensor data model (`Sensor`, `SensorValue`, the `SensorUpdate` trait)
//! - [`shutdown`] - Root cancellation signal shared by every task
//! - [`device`] - Device metadata
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration sections shared by every agent (Zenoh, logging)
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod config;
pub mod device;
pub mod error;
pub mod sensor;
pub mod serialization;
pub mod session;
pub mod shutdown;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode};
pub use device::{DeviceInfo, sanitize_key};
pub use error::{Error, Result};
pub use sensor::{
    BoxedUpdate, DeviceClass, Sensor, SensorType, SensorUpdate, SensorValue, StateClass,
    current_timestamp_millis,
};
pub use serialization::{Format, encode};
pub use session::connect;
pub use shutdown::{Shutdown, ShutdownTrigger};

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, replaces `config.level`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing already initialized: {e}")))
}
