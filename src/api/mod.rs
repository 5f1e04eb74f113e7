use async_trait::async_trait;

pub mod client;
pub mod models;

pub use client::{ApiError, Backend};
pub use models::{
    ClamAvStatus, ExternalPushRequest, ExternalRegistry, GcPhase, GcStatus, JobStatus,
    LocalPushRequest, PullRequest, PushAccepted, ScanDefaults, Severity, StagingJob,
};

/// Remote job store: owns the actual pull/scan/push execution. The client
/// only creates, reads and deletes job records through this seam.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn create_job(&self, request: &PullRequest) -> Result<StagingJob, ApiError>;

    async fn list_jobs(&self) -> Result<Vec<StagingJob>, ApiError>;

    async fn get_job(&self, job_id: &str) -> Result<StagingJob, ApiError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), ApiError>;

    async fn push_local(&self, request: &LocalPushRequest) -> Result<PushAccepted, ApiError>;

    async fn push_external(&self, request: &ExternalPushRequest)
        -> Result<PushAccepted, ApiError>;
}

/// Remote registry garbage-collection service.
#[async_trait]
pub trait GcService: Send + Sync + 'static {
    async fn start_gc(&self, dry_run: bool) -> Result<GcStatus, ApiError>;

    async fn gc_status(&self) -> Result<GcStatus, ApiError>;
}

/// Reachability probe for the ClamAV daemon behind the backend.
#[async_trait]
pub trait ClamAvProbe: Send + Sync + 'static {
    async fn clamav_status(&self) -> Result<ClamAvStatus, ApiError>;
}
