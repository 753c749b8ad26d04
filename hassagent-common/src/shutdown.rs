//! Process-wide cancellation.
//!
//! A single [`ShutdownTrigger`] owns the root signal; every long-running task
//! holds a cloned [`Shutdown`] and selects on [`Shutdown::cancelled`].

use tokio::sync::watch;

/// Owning side of the root cancellation signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Cloneable observer of the root cancellation signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    /// Create a new trigger and its first observer.
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    /// Fire the signal. Calling it more than once has no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another observer of this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Shutdown {
    /// Shorthand for [`ShutdownTrigger::new`], mostly used in tests.
    pub fn pair() -> (ShutdownTrigger, Shutdown) {
        ShutdownTrigger::new()
    }

    /// Whether the signal already fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    ///
    /// A dropped trigger counts as fired: nothing could cancel the task later.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
