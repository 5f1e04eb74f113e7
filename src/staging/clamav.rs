use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::api::models::ClamAvStatus;
use crate::api::ClamAvProbe;
use crate::poller::PollTarget;

/// Keeps the ClamAV reachability indicator fresh.
///
/// A plain fixed-interval health poll: the predicate is always true, so
/// every tick probes the daemon. None until the first probe answers.
pub struct ClamAvMonitor<P: ClamAvProbe> {
    probe: Arc<P>,
    status: watch::Sender<Option<ClamAvStatus>>,
}

impl<P: ClamAvProbe> ClamAvMonitor<P> {
    pub fn new(probe: Arc<P>) -> Self {
        let (status, _) = watch::channel(None);
        Self { probe, status }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ClamAvStatus>> {
        self.status.subscribe()
    }

    pub fn status(&self) -> Option<ClamAvStatus> {
        self.status.borrow().clone()
    }
}

#[async_trait]
impl<P: ClamAvProbe> PollTarget for ClamAvMonitor<P> {
    fn due(&self) -> bool {
        true
    }

    async fn tick(&self) {
        match self.probe.clamav_status().await {
            Ok(status) => {
                let _ = self.status.send(Some(status));
            }
            Err(e) => warn!("ClamAV status probe failed: {}", e),
        }
    }
}
