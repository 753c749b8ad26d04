//! Lazily opened bus connections, one per scope.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use hassagent_common::Shutdown;
use hassagent_dbus::{BusHandle, BusScope};

/// Holds at most one [`BusHandle`] per [`BusScope`].
///
/// Handles are opened on first use and shared by every producer afterwards.
/// A failed open is not cached, so a later caller retries.
#[derive(Debug)]
pub struct BusRegistry {
    shutdown: Shutdown,
    buses: Mutex<HashMap<BusScope, Arc<BusHandle>>>,
}

impl BusRegistry {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            buses: Mutex::new(HashMap::new()),
        }
    }

    /// The handle for `scope`, connecting if needed.
    pub async fn get(&self, scope: BusScope) -> hassagent_dbus::Result<Arc<BusHandle>> {
        // Held across the connect so concurrent callers share one connection.
        let mut buses = self.buses.lock().await;
        if let Some(bus) = buses.get(&scope) {
            return Ok(bus.clone());
        }

        let bus = BusHandle::open(scope, self.shutdown.clone()).await?;
        buses.insert(scope, bus.clone());
        Ok(bus)
    }

    /// Like [`get`](Self::get), logging the failure and returning `None`.
    ///
    /// Producers use this to degrade gracefully on machines without the bus.
    pub async fn try_get(&self, scope: BusScope) -> Option<Arc<BusHandle>> {
        match self.get(scope).await {
            Ok(bus) => Some(bus),
            Err(e) => {
                warn!(scope = %scope, error = %e, "D-Bus unavailable, dependent sensors disabled");
                None
            }
        }
    }

    /// Scopes with an open handle.
    pub async fn scopes(&self) -> Vec<BusScope> {
        self.buses.lock().await.keys().copied().collect()
    }

    /// Wait until every opened handle finished its teardown.
    ///
    /// Only resolves after the shutdown signal fired.
    pub async fn wait_closed(&self) {
        let buses: Vec<Arc<BusHandle>> = self.buses.lock().await.values().cloned().collect();
        for bus in buses {
            bus.wait_closed().await;
            debug!(scope = %bus.scope(), "Bus closed");
        }
    }
}
