//! Polling producers.
//!
//! Pollers collect on a fixed interval plus a random jitter so that several
//! agents (or several sensors of one agent) do not hit the system in lockstep.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use hassagent_common::{BoxedUpdate, Shutdown};

/// Buffer of a poller's output stream.
pub const POLL_BUFFER: usize = 32;

/// Interval timer with random jitter.
#[derive(Debug)]
pub struct PollTimer {
    interval: Duration,
    jitter: Duration,
    rng: SmallRng,
}

/// Create a timer firing every `interval` plus up to `jitter`.
pub fn poll_with_jitter(interval: Duration, jitter: Duration) -> PollTimer {
    PollTimer {
        interval,
        jitter,
        rng: SmallRng::from_os_rng(),
    }
}

impl PollTimer {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Delay until the next tick, in `[interval, interval + jitter]`.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(self.rng.random_range(0..=jitter_ms))
    }

    /// Sleep until the next tick. Returns `false` if `shutdown` fired first.
    pub async fn tick(&mut self, shutdown: &Shutdown) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Spawn a polling producer.
///
/// `collect` runs once immediately and then on every tick; each returned
/// update is sent on the stream. The stream closes when `shutdown` fires.
/// Collection errors are the closure's business: log them and return what
/// could be gathered, possibly nothing.
pub fn spawn_poller<F>(
    name: &'static str,
    shutdown: Shutdown,
    mut timer: PollTimer,
    mut collect: F,
) -> mpsc::Receiver<BoxedUpdate>
where
    F: FnMut() -> Vec<BoxedUpdate> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(POLL_BUFFER);

    tokio::spawn(async move {
        debug!(
            producer = name,
            interval_secs = timer.interval().as_secs(),
            jitter_secs = timer.jitter().as_secs(),
            "Starting poller"
        );

        'poll: loop {
            let updates = collect();
            trace!(producer = name, updates = updates.len(), "Collected");

            for update in updates {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'poll,
                    sent = tx.send(update) => {
                        if sent.is_err() {
                            break 'poll;
                        }
                    }
                }
            }

            if !timer.tick(&shutdown).await {
                break;
            }
        }

        debug!(producer = name, "Poller stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    use hassagent_common::{Sensor, SensorValue, ShutdownTrigger};
    use tokio::time::timeout;

    #[test]
    fn test_next_delay_within_bounds() {
        let mut timer = poll_with_jitter(Duration::from_secs(60), Duration::from_secs(5));
        for _ in 0..100 {
            let delay = timer.next_delay();
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(65));
        }
    }

    #[test]
    fn test_no_jitter() {
        let mut timer = poll_with_jitter(Duration::from_secs(10), Duration::ZERO);
        assert_eq!(timer.next_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_poller_collects_until_shutdown() {
        let (trigger, shutdown) = ShutdownTrigger::new();
        let mut ticks = 0i64;
        let timer = poll_with_jitter(Duration::from_millis(10), Duration::from_millis(5));

        let mut rx = spawn_poller("counter", shutdown, timer, move || {
            ticks += 1;
            vec![Sensor::new("ticks", "Ticks", SensorValue::Integer(ticks)).boxed()]
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.value(), SensorValue::Integer(1));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.value(), SensorValue::Integer(2));

        trigger.trigger();
        let closed = timeout(Duration::from_secs(2), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
