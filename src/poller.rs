use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A resource refreshed by adaptive polling.
///
/// `due` is a predicate over the target's *current local state*: when it
/// returns false the tick is skipped entirely and no fetch happens. `tick`
/// fetches the latest snapshot and applies it; transient failures must be
/// swallowed (and logged) inside `tick` so the schedule keeps running and
/// the next interval acts as the retry cadence.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    /// Whether a fetch should fire this tick.
    fn due(&self) -> bool;

    /// Fetch the latest snapshot and apply it to local state.
    async fn tick(&self);

    /// Whether the poll loop should stop for good. Targets that poll for
    /// the lifetime of their owner keep the default.
    fn finished(&self) -> bool {
        false
    }
}

/// Cancellable handle to a fixed-interval poll loop.
///
/// Each tick evaluates `due()` first; a skipped tick makes no network call.
/// A fired tick is awaited before the next interval, so within one poller
/// results are applied in request order. Dropping the handle stops the
/// schedule and discards any in-flight fetch, so no state is written after
/// teardown. Storing a new `Poller` in place of an old one supersedes it;
/// there is never more than one live timer per logical poll.
pub struct Poller {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn a poll loop over `target`, firing every `interval`.
    pub fn spawn<T: PollTarget>(target: Arc<T>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if target.finished() {
                            debug!("Poll target finished, stopping schedule");
                            break;
                        }
                        if !target.due() {
                            continue;
                        }
                        // Race the fetch against cancellation: a stop signal
                        // drops the in-flight future before its result is
                        // applied (stale-write guard).
                        tokio::select! {
                            _ = stop_rx.changed() => break,
                            _ = target.tick() => {}
                        }
                        if target.finished() {
                            debug!("Poll target finished, stopping schedule");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the schedule and wait for the loop to wind down.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingTarget {
        due: AtomicBool,
        fetches: AtomicUsize,
        applied: AtomicUsize,
        delay: Duration,
    }

    impl CountingTarget {
        fn new(due: bool, delay: Duration) -> Self {
            Self {
                due: AtomicBool::new(due),
                fetches: AtomicUsize::new(0),
                applied: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl PollTarget for CountingTarget {
        fn due(&self) -> bool {
            self.due.load(Ordering::SeqCst)
        }

        async fn tick(&self) {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.applied.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_tick_makes_no_fetch() {
        let target = Arc::new(CountingTarget::new(false, Duration::ZERO));
        let poller = Poller::spawn(target.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.fetches.load(Ordering::SeqCst), 0);
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_every_interval_while_due() {
        let target = Arc::new(CountingTarget::new(true, Duration::ZERO));
        let _poller = Poller::spawn(target.clone(), Duration::from_secs(1));

        // First tick fires immediately, then once per second.
        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(target.fetches.load(Ordering::SeqCst), 5);
        assert_eq!(target.applied.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_flip_stops_fetching() {
        let target = Arc::new(CountingTarget::new(true, Duration::ZERO));
        let _poller = Poller::spawn(target.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let fired = target.fetches.load(Ordering::SeqCst);
        assert!(fired >= 1);

        target.due.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.fetches.load(Ordering::SeqCst), fired);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_discards_in_flight_result() {
        // Fetch takes 5s; drop the poller while it is in flight.
        let target = Arc::new(CountingTarget::new(true, Duration::from_secs(5)));
        let poller = Poller::spawn(target.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(target.fetches.load(Ordering::SeqCst), 1);

        drop(poller);
        tokio::time::sleep(Duration::from_secs(30)).await;

        // The fetch started but its result was never applied.
        assert_eq!(target.applied.load(Ordering::SeqCst), 0);
    }

    struct OneShotTarget {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PollTarget for OneShotTarget {
        fn due(&self) -> bool {
            true
        }

        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn finished(&self) -> bool {
            self.ticks.load(Ordering::SeqCst) >= 1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_target_stops_itself() {
        let target = Arc::new(OneShotTarget {
            ticks: AtomicUsize::new(0),
        });
        let _poller = Poller::spawn(target.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.ticks.load(Ordering::SeqCst), 1);
    }
}
