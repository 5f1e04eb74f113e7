use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use crate::api::models::{GcPhase, GcStatus};
use crate::api::{ApiError, GcService};
use crate::poller::{PollTarget, Poller};

/// Notification published when the GC run crosses into a terminal state.
/// Consumers refresh their own read-only views (dashboard stats, ghost
/// repositories); the tracker does not own them.
#[derive(Debug, Clone, PartialEq)]
pub enum GcEvent {
    Completed {
        dry_run: bool,
        freed_bytes: Option<u64>,
    },
}

struct GcState<G: GcService> {
    service: Arc<G>,
    status: watch::Sender<GcStatus>,
    events: broadcast::Sender<GcEvent>,
}

impl<G: GcService> GcState<G> {
    /// Replace the status wholesale; publishes exactly one `Completed`
    /// event per transition into `done`.
    fn ingest(&self, next: GcStatus) {
        let completed = {
            let previous = self.status.borrow();
            previous.status != GcPhase::Done && next.status == GcPhase::Done
        };
        if completed {
            info!(
                "Registry GC finished (dry_run={}, freed_bytes={:?})",
                next.dry_run, next.freed_bytes
            );
            let _ = self.events.send(GcEvent::Completed {
                dry_run: next.dry_run,
                freed_bytes: next.freed_bytes,
            });
        }
        let _ = self.status.send(next);
    }
}

#[async_trait]
impl<G: GcService> PollTarget for GcState<G> {
    fn due(&self) -> bool {
        self.status.borrow().is_running()
    }

    async fn tick(&self) {
        match self.service.gc_status().await {
            Ok(status) => self.ingest(status),
            Err(e) => warn!("GC status refresh failed: {}", e),
        }
    }

    fn finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }
}

/// Tracks the single global garbage-collection run.
///
/// Unlike the job board, polling is not continuous: it starts in response
/// to an explicit `start` and the loop stops itself once a terminal status
/// is observed. Starting a new run supersedes any previous poll loop.
pub struct GcTracker<G: GcService> {
    state: Arc<GcState<G>>,
    poller: Mutex<Option<Poller>>,
    interval: Duration,
}

impl<G: GcService> GcTracker<G> {
    pub fn new(service: Arc<G>, interval: Duration) -> Self {
        let (status, _) = watch::channel(GcStatus::idle());
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(GcState {
                service,
                status,
                events,
            }),
            poller: Mutex::new(None),
            interval,
        }
    }

    /// Last known status.
    pub fn status(&self) -> GcStatus {
        self.state.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<GcStatus> {
        self.state.status.subscribe()
    }

    /// Subscribe to completion notifications.
    pub fn events(&self) -> broadcast::Receiver<GcEvent> {
        self.state.events.subscribe()
    }

    /// Submit a start request, ingest the immediately returned status and
    /// begin adaptive polling gated on `running`.
    pub async fn start(&self, dry_run: bool) -> Result<GcStatus, ApiError> {
        let status = self.state.service.start_gc(dry_run).await?;
        info!("Registry GC started (dry_run={})", dry_run);
        self.state.ingest(status.clone());

        // Dropping the previous poller stops it; a restart never leaves two
        // timers running.
        let mut guard = self.poller.lock().await;
        *guard = Some(Poller::spawn(self.state.clone(), self.interval));
        Ok(status)
    }

    /// One-shot fetch outside the poll schedule.
    pub async fn refresh(&self) -> Result<GcStatus, ApiError> {
        let status = self.state.service.gc_status().await?;
        self.state.ingest(status.clone());
        Ok(status)
    }

    /// Stop any running poll loop.
    pub async fn shutdown(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn running() -> GcStatus {
        GcStatus {
            status: GcPhase::Running,
            ..GcStatus::idle()
        }
    }

    fn done(freed: u64) -> GcStatus {
        GcStatus {
            status: GcPhase::Done,
            freed_bytes: Some(freed),
            ..GcStatus::idle()
        }
    }

    /// GC service replaying a scripted sequence of statuses.
    struct ScriptedGc {
        script: StdMutex<Vec<GcStatus>>,
        polls: AtomicUsize,
    }

    impl ScriptedGc {
        fn new(script: Vec<GcStatus>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script),
                polls: AtomicUsize::new(0),
            })
        }

        fn next_status(&self) -> GcStatus {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    #[async_trait]
    impl GcService for ScriptedGc {
        async fn start_gc(&self, dry_run: bool) -> Result<GcStatus, ApiError> {
            let mut status = self.next_status();
            status.dry_run = dry_run;
            Ok(status)
        }

        async fn gc_status(&self) -> Result<GcStatus, ApiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.next_status())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_done_then_stops() {
        let service = ScriptedGc::new(vec![running(), running(), running(), done(4096)]);
        let tracker = GcTracker::new(service.clone(), Duration::from_secs(2));
        let mut events = tracker.events();

        let first = tracker.start(false).await.unwrap();
        assert!(first.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;

        // Three polls: running, running, done — then the loop stopped itself.
        assert_eq!(service.polls.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.status().status, GcPhase::Done);

        // Exactly one completion notification.
        assert_eq!(
            events.try_recv().unwrap(),
            GcEvent::Completed {
                dry_run: false,
                freed_bytes: Some(4096),
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_supersedes_previous_poll() {
        let service = ScriptedGc::new(vec![running(), running()]);
        let tracker = GcTracker::new(service.clone(), Duration::from_secs(2));

        tracker.start(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let after_first = service.polls.load(Ordering::SeqCst);

        tracker.start(true).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        // Polls keep arriving at the single-poller cadence: at most one
        // fetch per interval after the restart.
        let after_second = service.polls.load(Ordering::SeqCst);
        assert!(after_second - after_first <= 3);

        tracker.shutdown().await;
        let settled = service.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.polls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn refresh_is_one_shot() {
        let service = ScriptedGc::new(vec![done(0)]);
        let tracker = GcTracker::new(service.clone(), Duration::from_secs(2));

        let status = tracker.refresh().await.unwrap();
        assert_eq!(status.status, GcPhase::Done);
        assert_eq!(service.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn done_is_notified_once_even_when_repeated() {
        let service = ScriptedGc::new(vec![done(1), done(1)]);
        let tracker = GcTracker::new(service.clone(), Duration::from_secs(2));
        let mut events = tracker.events();

        tracker.refresh().await.unwrap();
        tracker.refresh().await.unwrap();

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }
}
