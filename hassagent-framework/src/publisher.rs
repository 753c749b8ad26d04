//! Payload publisher for Zenoh.

use std::sync::Arc;

use serde::Serialize;

use hassagent_common::{Format, encode};

use crate::error::{AgentError, Result};

/// Publisher for sending agent payloads to Zenoh.
///
/// Wraps a Zenoh session and a key prefix; payloads are encoded with the
/// configured [`Format`].
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Build a full key expression from a suffix.
    pub fn build_key(&self, suffix: &str) -> String {
        join_key(&self.key_prefix, suffix)
    }

    /// Encode `value` and publish it under the publisher's prefix.
    pub async fn publish<T: Serialize>(&self, key_suffix: &str, value: &T) -> Result<()> {
        let payload =
            encode(value, self.format).map_err(|e| AgentError::Serialization(e.to_string()))?;
        self.publish_raw(&self.build_key(key_suffix), payload).await
    }

    /// Publish raw bytes to a full key.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| AgentError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a JSON value to a full key, regardless of the configured format.
    pub async fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

pub(crate) fn join_key(prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(
            join_key("hassagent/laptop", "sensor/battery/state"),
            "hassagent/laptop/sensor/battery/state"
        );
        assert_eq!(join_key("hassagent/laptop", ""), "hassagent/laptop");
    }
}
