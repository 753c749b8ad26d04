//! Errors raised while setting up and running an agent.

use thiserror::Error;

use hassagent_dbus::BusError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No configuration file at {path}")]
    ConfigNotFound { path: String },

    #[error("Malformed configuration: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// The Zenoh session could not be opened.
    #[error("Cannot reach Zenoh: {0}")]
    ZenohConnection(String),

    /// An open session failed.
    #[error("Zenoh session failed: {0}")]
    ZenohSession(String),

    #[error("Cannot encode payload: {0}")]
    Serialization(String),

    #[error("Publishing on '{key}' failed: {message}")]
    Publish { key: String, message: String },

    #[error(transparent)]
    Bus(#[from] BusError),

    /// A job never reached the remote sink.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Attach a description of what was being attempted to `source`.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error stems from the configuration file.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound { .. }
                | Self::ConfigParse(_)
                | Self::ConfigValidation(_)
        )
    }
}

impl From<zenoh::Error> for AgentError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for AgentError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<hassagent_common::Error> for AgentError {
    fn from(err: hassagent_common::Error) -> Self {
        use hassagent_common::Error as Common;

        match err {
            Common::Config(msg) => Self::Config(msg),
            Common::Zenoh(e) => e.into(),
            Common::Json(e) => e.into(),
            Common::Cbor(msg) => Self::Serialization(msg),
            Common::Io(e) => Self::Io(e),
        }
    }
}
