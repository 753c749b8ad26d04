//! Agent status reporting.

use serde::{Deserialize, Serialize};

use hassagent_common::DeviceInfo;

use crate::Result;
use crate::publisher::Publisher;

/// Status message published on `<prefix>/<device>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent name.
    pub agent: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// The device the agent runs on.
    pub device: DeviceInfo,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl AgentStatus {
    fn new(agent: impl Into<String>, status: &str, device: DeviceInfo) -> Self {
        Self {
            agent: agent.into(),
            status: status.to_string(),
            device,
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(agent: impl Into<String>, device: DeviceInfo) -> Self {
        Self::new(agent, "running", device)
    }

    /// Create a status with "offline" state.
    pub fn offline(agent: impl Into<String>, device: DeviceInfo) -> Self {
        Self::new(agent, "offline", device)
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status to Zenoh.
    ///
    /// Publishes JSON to `{key_prefix}/@/status`.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        publisher.publish_json(&status_key(publisher.key_prefix()), self).await
    }
}

pub(crate) fn status_key(prefix: &str) -> String {
    format!("{}/@/status", prefix)
}

/// Helper to publish agent status on startup and shutdown.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    publisher: Publisher,
    agent: String,
    device: DeviceInfo,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(publisher: Publisher, agent: impl Into<String>, device: DeviceInfo) -> Self {
        Self {
            publisher,
            agent: agent.into(),
            device,
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = AgentStatus::running(&self.agent, self.device.clone());
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        AgentStatus::offline(&self.agent, self.device.clone())
            .publish(&self.publisher)
            .await
    }
}
