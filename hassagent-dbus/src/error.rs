//! Error types for the bus layer.

use thiserror::Error;

use crate::bus::BusScope;

/// Result type alias using [`BusError`].
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by bus operations.
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus could not be reached or refused authentication.
    #[error("Could not connect to the {scope} bus: {source}")]
    Connection {
        scope: BusScope,
        #[source]
        source: zbus::Error,
    },

    /// The request has no bus handle to work with.
    #[error("No bus connection")]
    NoConnection,

    /// The bus handle is shutting down and no longer accepts watches.
    #[error("The {0} bus connection is closing")]
    Closed(BusScope),

    /// The call reached the bus but failed on the remote side.
    #[error("Remote call {member} on {destination} failed: {source}")]
    Remote {
        destination: String,
        member: String,
        #[source]
        source: zbus::Error,
    },

    /// A value could not be coerced into the requested shape.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// A member name could not be resolved to an interface and a member.
    #[error("Invalid member name '{0}': expected 'interface.Member' or an interface on the request")]
    InvalidMember(String),

    /// A match option was rejected while building the match rule.
    #[error("Invalid match rule: {0}")]
    InvalidRule(String),
}

impl BusError {
    /// Create a type mismatch error.
    pub fn mismatch(expected: &'static str, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            actual: actual.into(),
        }
    }

    /// Whether the error came from the remote side of a call.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
