//! Long-lived bus connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use hassagent_common::Shutdown;

use crate::error::{BusError, Result};
use crate::watch::WatchControl;

/// Which bus a handle is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusScope {
    Session,
    System,
}

impl BusScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusScope::Session => "session",
            BusScope::System => "system",
        }
    }
}

impl std::fmt::Display for BusScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection to one bus, shared by every request against it.
///
/// Calls are not serialized by the handle. The only synchronization it owns
/// is the teardown barrier: when the shutdown signal fires, the connection is
/// closed only after every signal watch registered on it has exited.
#[derive(Debug)]
pub struct BusHandle {
    scope: BusScope,
    conn: zbus::Connection,
    shutdown: Shutdown,
    /// Held until teardown starts; each watch task owns a clone.
    barrier: Mutex<Option<mpsc::Sender<()>>>,
    watches: Mutex<Vec<Arc<WatchControl>>>,
    next_watch_id: AtomicU64,
    closed: watch::Receiver<bool>,
}

impl BusHandle {
    /// Connect to the given bus.
    ///
    /// The returned handle tears itself down once `shutdown` fires.
    pub async fn open(scope: BusScope, shutdown: Shutdown) -> Result<Arc<Self>> {
        let conn = match scope {
            BusScope::Session => zbus::Connection::session().await,
            BusScope::System => zbus::Connection::system().await,
        }
        .map_err(|source| BusError::Connection { scope, source })?;

        info!(
            scope = %scope,
            unique_name = ?conn.unique_name().map(|n| n.to_string()),
            "Connected to D-Bus"
        );

        Ok(Self::from_connection(scope, conn, shutdown))
    }

    /// Wrap an already established connection.
    pub fn from_connection(scope: BusScope, conn: zbus::Connection, shutdown: Shutdown) -> Arc<Self> {
        let (barrier_tx, barrier_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = Arc::new(Self {
            scope,
            conn: conn.clone(),
            shutdown: shutdown.clone(),
            barrier: Mutex::new(Some(barrier_tx)),
            watches: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            closed: closed_rx,
        });

        tokio::spawn(lifecycle(
            Arc::downgrade(&handle),
            scope,
            conn,
            shutdown,
            barrier_rx,
            closed_tx,
        ));

        handle
    }

    pub fn scope(&self) -> BusScope {
        self.scope
    }

    /// The underlying connection.
    pub fn connection(&self) -> &zbus::Connection {
        &self.conn
    }

    /// The shutdown signal this handle follows.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Whether teardown has completed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the connection has been closed.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Number of signal watches currently running on this bus.
    pub fn active_watches(&self) -> usize {
        self.watches.lock().len()
    }

    /// A barrier token for a new watch task, or an error once teardown started.
    pub(crate) fn barrier_token(&self) -> Result<mpsc::Sender<()>> {
        self.barrier
            .lock()
            .as_ref()
            .cloned()
            .ok_or(BusError::Closed(self.scope))
    }

    pub(crate) fn next_watch_id(&self) -> u64 {
        self.next_watch_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_watch(&self, control: Arc<WatchControl>) {
        self.watches.lock().push(control);
    }

    pub(crate) fn forget_watch(&self, id: u64) {
        self.watches.lock().retain(|w| w.id() != id);
    }

    /// Active watches whose rule text equals `rule`.
    pub(crate) fn watches_for_rule(&self, rule: &str) -> Vec<Arc<WatchControl>> {
        self.watches
            .lock()
            .iter()
            .filter(|w| w.rule() == rule)
            .cloned()
            .collect()
    }
}

async fn lifecycle(
    handle: std::sync::Weak<BusHandle>,
    scope: BusScope,
    conn: zbus::Connection,
    shutdown: Shutdown,
    mut barrier_rx: mpsc::Receiver<()>,
    closed_tx: watch::Sender<bool>,
) {
    shutdown.cancelled().await;
    debug!(scope = %scope, "Tearing down D-Bus connection");

    // Release the handle's own token so only watch tasks keep the barrier open.
    if let Some(handle) = handle.upgrade() {
        handle.barrier.lock().take();
    }

    // recv() yields None once every watch task dropped its token.
    while barrier_rx.recv().await.is_some() {}

    if let Err(e) = conn.close().await {
        warn!(scope = %scope, error = %e, "Error closing D-Bus connection");
    }

    closed_tx.send_replace(true);
    debug!(scope = %scope, "D-Bus connection closed");
}
