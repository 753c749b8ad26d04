//! Fan-in of producer streams.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use hassagent_common::Shutdown;

/// Buffer of the merged stream.
pub const MERGE_BUFFER: usize = 64;

/// Merge many receivers into one.
///
/// One forwarding task is spawned per source. A task stops when its source
/// closes or when `shutdown` fires; shutdown wins over a pending send, so a
/// stalled consumer never delays cancellation. The merged receiver closes
/// once every forwarding task has stopped, and immediately when there are no
/// sources. Items of one source keep their order; items of different
/// sources interleave arbitrarily.
///
/// Must be called from within a Tokio runtime.
pub fn merge<T, I>(shutdown: Shutdown, sources: I) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = mpsc::Receiver<T>>,
{
    merge_with_capacity(shutdown, sources, MERGE_BUFFER)
}

/// [`merge`] with an explicit buffer size for the merged stream.
pub fn merge_with_capacity<T, I>(shutdown: Shutdown, sources: I, capacity: usize) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = mpsc::Receiver<T>>,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let mut count = 0;
    for source in sources {
        tokio::spawn(forward(count, source, tx.clone(), shutdown.clone()));
        count += 1;
    }
    debug!(sources = count, "Merging sensor streams");

    // Forwarders hold the only remaining senders.
    drop(tx);
    rx
}

async fn forward<T>(index: usize, mut source: mpsc::Receiver<T>, sink: mpsc::Sender<T>, shutdown: Shutdown) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = source.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = sink.send(item) => {
                if sent.is_err() {
                    // Consumer is gone.
                    break;
                }
            }
        }
    }

    trace!(source = index, "Stopped forwarding sensor stream");
}
