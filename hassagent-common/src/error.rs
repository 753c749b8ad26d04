use std::fmt::Debug;

use thiserror::Error;

/// Errors of the shared agent plumbing.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unusable settings.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR payload: {0}")]
    Cbor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl<E: Debug> From<ciborium::ser::Error<E>> for Error {
    fn from(e: ciborium::ser::Error<E>) -> Self {
        Error::Cbor(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
