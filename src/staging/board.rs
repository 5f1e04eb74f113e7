use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::models::{PullRequest, StagingJob};
use crate::api::{ApiError, JobStore};
use crate::poller::PollTarget;

/// Stable active-first ordering: every in-flight job appears before every
/// terminal one, and relative order within each partition matches the
/// snapshot, so in-progress jobs never scroll below finished ones.
pub fn order_active_first(jobs: &mut [StagingJob]) {
    jobs.sort_by_key(|job| job.status.is_terminal());
}

/// Owns the client's in-memory job collection and drives it against the
/// remote job store.
///
/// State lives in a `watch` cell: consumers subscribe for change
/// notifications instead of the store pushing into them. As a
/// [`PollTarget`] the board refreshes only while at least one job is still
/// in the active set.
pub struct JobBoard<S: JobStore> {
    store: Arc<S>,
    jobs: watch::Sender<Vec<StagingJob>>,
}

impl<S: JobStore> JobBoard<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (jobs, _) = watch::channel(Vec::new());
        Self { store, jobs }
    }

    /// Subscribe to collection changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<StagingJob>> {
        self.jobs.subscribe()
    }

    /// Current collection, already ordered.
    pub fn snapshot(&self) -> Vec<StagingJob> {
        self.jobs.borrow().clone()
    }

    /// Whether any job is still in the active set.
    pub fn has_active(&self) -> bool {
        self.jobs.borrow().iter().any(|j| j.status.is_active())
    }

    fn ingest(&self, mut jobs: Vec<StagingJob>) {
        order_active_first(&mut jobs);
        let _ = self.jobs.send(jobs);
    }

    /// Fetch the full list from the store and replace the local collection.
    pub async fn load(&self) -> Result<(), ApiError> {
        let jobs = self.store.list_jobs().await?;
        self.ingest(jobs);
        Ok(())
    }

    /// Submit a pull request and prepend the returned job immediately. The
    /// optimistic insert keeps the new job visible before the next poll
    /// catches up with the store.
    pub async fn create(&self, request: PullRequest) -> Result<StagingJob, ApiError> {
        let job = self.store.create_job(&request).await?;
        info!(
            "Staging job {} created for {}:{}",
            job.job_id, job.image, job.tag
        );
        self.jobs.send_modify(|jobs| jobs.insert(0, job.clone()));
        Ok(job)
    }

    /// Delete a job from the store, then reload the full list. No
    /// optimistic local removal: a server-side failure must stay visible.
    pub async fn delete(&self, job_id: &str) -> Result<(), ApiError> {
        self.store.delete_job(job_id).await?;
        info!("Staging job {} deleted", job_id);
        self.load().await
    }
}

#[async_trait]
impl<S: JobStore> PollTarget for JobBoard<S> {
    fn due(&self) -> bool {
        self.has_active()
    }

    async fn tick(&self) {
        // Best effort: a transient fetch failure only stalls the display
        // until the next tick.
        if let Err(e) = self.load().await {
            warn!("Job list refresh failed: {}", e);
        }
    }
}
