//! Signal subscriptions.
//!
//! A watch owns one message stream filtered by a match rule and a dispatch
//! task that awaits the caller's handler for every signal, in order. A slow
//! handler therefore throttles its own subscription and nothing else.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};
use zbus::zvariant::{OwnedValue, Type};
use zbus::{MatchRule, Message, MessageStream};

use hassagent_common::Shutdown;

use crate::bus::BusHandle;
use crate::error::{BusError, Result};
use crate::value::BusValue;

/// Messages buffered per subscription before the bus connection applies backpressure.
const SIGNAL_QUEUE: usize = 64;

/// A signal delivered to a watch handler.
#[derive(Debug, Clone)]
pub struct Signal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub sender: Option<String>,
    message: Message,
}

impl Signal {
    /// Wrap a message, or `None` when it is not a signal.
    pub fn from_message(message: Message) -> Option<Self> {
        if message.message_type() != zbus::message::Type::Signal {
            return None;
        }

        let header = message.header();
        let path = header.path().map(|p| p.to_string()).unwrap_or_default();
        let interface = header.interface().map(|i| i.to_string()).unwrap_or_default();
        let member = header.member().map(|m| m.to_string()).unwrap_or_default();
        let sender = header.sender().map(|s| s.to_string());
        drop(header);

        Some(Self {
            path,
            interface,
            member,
            sender,
            message,
        })
    }

    /// Decode the signal arguments.
    pub fn args<T>(&self) -> Result<T>
    where
        T: for<'d> serde::Deserialize<'d> + Type,
    {
        self.message
            .body()
            .deserialize::<T>()
            .map_err(|e| BusError::mismatch(std::any::type_name::<T>(), e.to_string()))
    }

    /// Decode a `PropertiesChanged` signal.
    pub fn properties_changed(&self) -> Result<PropertiesChanged> {
        let (interface, changed, invalidated) =
            self.args::<(String, HashMap<String, OwnedValue>, Vec<String>)>()?;

        Ok(PropertiesChanged {
            interface,
            changed: changed
                .iter()
                .map(|(name, value)| (name.clone(), BusValue::from(value)))
                .collect(),
            invalidated,
        })
    }

    /// The raw message.
    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// Decoded arguments of `org.freedesktop.DBus.Properties.PropertiesChanged`.
#[derive(Debug, Default, PartialEq)]
pub struct PropertiesChanged {
    pub interface: String,
    pub changed: HashMap<String, BusValue>,
    pub invalidated: Vec<String>,
}

/// Receives the signals of a watch.
///
/// Implemented for every `Fn(Signal) -> impl Future<Output = ()>` closure.
pub trait SignalHandler: Send + Sync + 'static {
    fn handle(&self, signal: Signal) -> impl Future<Output = ()> + Send;
}

impl<F, Fut> SignalHandler for F
where
    F: Fn(Signal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn handle(&self, signal: Signal) -> impl Future<Output = ()> + Send {
        self(signal)
    }
}

/// Bookkeeping shared by a watch task, its [`SignalWatch`] and the bus registry.
#[derive(Debug)]
pub(crate) struct WatchControl {
    id: u64,
    rule: String,
    stop: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

impl WatchControl {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn rule(&self) -> &str {
        &self.rule
    }

    fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Ask the task to stop and wait until it has exited.
    pub(crate) async fn stop_and_wait(&self) {
        self.stop.send_replace(true);
        let mut done = self.done.clone();
        let _ = done.wait_for(|done| *done).await;
    }
}

/// Handle to a running signal subscription.
///
/// Dropping the handle does not stop the subscription; it keeps running
/// until [`remove`](Self::remove) is called, a matching
/// [`BusRequest::remove_watch`](crate::BusRequest::remove_watch) runs, or
/// the shutdown signal fires.
#[derive(Debug)]
pub struct SignalWatch {
    control: Arc<WatchControl>,
}

impl SignalWatch {
    /// The match rule this watch was registered with.
    pub fn rule(&self) -> &str {
        self.control.rule()
    }

    /// Whether the dispatch task is still running.
    pub fn is_active(&self) -> bool {
        !self.control.is_done()
    }

    /// Stop the subscription and wait for its dispatch task to exit.
    ///
    /// Safe to call after the watch already stopped.
    pub async fn remove(&self) {
        self.control.stop_and_wait().await;
    }
}

/// Subscribe to `rule` on `bus` and spawn the dispatch task.
pub(crate) async fn spawn_watch<H: SignalHandler>(
    bus: &Arc<BusHandle>,
    rule: MatchRule<'static>,
    shutdown: Shutdown,
    handler: H,
) -> Result<SignalWatch> {
    let barrier = bus.barrier_token()?;
    let rule_text = rule.to_string();

    let stream = MessageStream::for_match_rule(rule, bus.connection(), Some(SIGNAL_QUEUE))
        .await
        .map_err(|source| BusError::Remote {
            destination: "org.freedesktop.DBus".to_string(),
            member: "AddMatch".to_string(),
            source,
        })?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);
    let control = Arc::new(WatchControl {
        id: bus.next_watch_id(),
        rule: rule_text,
        stop: stop_tx,
        done: done_rx,
    });
    bus.register_watch(control.clone());

    debug!(scope = %bus.scope(), rule = %control.rule, "Added D-Bus signal watch");

    let task = WatchTask {
        root: bus.shutdown().clone(),
        shutdown,
        stop: stop_rx,
        exit: WatchExit {
            id: control.id,
            rule: control.rule.clone(),
            bus: Arc::downgrade(bus),
            stream: Some(stream),
            done: done_tx,
            barrier: Some(barrier),
        },
    };
    tokio::spawn(task.run(handler));

    Ok(SignalWatch { control })
}

struct WatchTask {
    root: Shutdown,
    shutdown: Shutdown,
    stop: watch::Receiver<bool>,
    exit: WatchExit,
}

impl WatchTask {
    async fn run<H: SignalHandler>(mut self, handler: H) {
        let Some(stream) = self.exit.stream.as_mut() else {
            return;
        };
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                _ = stopped(&mut self.stop) => break,
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        if let Some(signal) = Signal::from_message(message) {
                            trace!(rule = %self.exit.rule, member = %signal.member, "Dispatching signal");
                            handler.handle(signal).await;
                        }
                    }
                    Some(Err(e)) => debug!(rule = %self.exit.rule, error = %e, "Error reading signal"),
                    None => break,
                },
            }
        }
    }
}

/// Bookkeeping released when a watch task ends, whether it returns or its
/// handler panics.
struct WatchExit {
    id: u64,
    rule: String,
    bus: Weak<BusHandle>,
    stream: Option<MessageStream>,
    done: watch::Sender<bool>,
    barrier: Option<mpsc::Sender<()>>,
}

impl Drop for WatchExit {
    fn drop(&mut self) {
        // Dropping the stream removes the match rule from the bus.
        drop(self.stream.take());

        if let Some(bus) = self.bus.upgrade() {
            bus.forget_watch(self.id);
        }
        debug!(rule = %self.rule, "Removed D-Bus signal watch");

        self.done.send_replace(true);
        drop(self.barrier.take());
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
