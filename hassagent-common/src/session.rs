//! Zenoh session setup.

use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::Result;

/// Open a Zenoh session for `config`.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let native = config.to_zenoh_config()?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );

    let session = zenoh::open(native).await?;
    tracing::info!(zid = %session.zid(), "Zenoh session open");

    Ok(session)
}
