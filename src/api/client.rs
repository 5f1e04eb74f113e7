use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::{
    CatalogSearchResponse, ClamAvStatus, DashboardStats, ExternalPushRequest, ExternalRegistry,
    GcStatus, LocalPushRequest, PullRequest, PushAccepted, ScanDefaults, StagingJob,
};
use super::{ClamAvProbe, GcService, JobStore};

/// Errors from talking to the staging backend
#[derive(Debug)]
pub enum ApiError {
    /// Request never produced an HTTP response (connect, timeout, decode)
    Transport(reqwest::Error),

    /// Backend answered with a non-success status
    Api { status: StatusCode, detail: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "Transport error: {}", e),
            ApiError::Api { status, detail } => write!(f, "Backend error ({}): {}", status, detail),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err)
    }
}

/// HTTP client for the staging backend. Implements the `JobStore`,
/// `GcService` and `ClamAvProbe` seams over its REST API.
pub struct Backend {
    http: reqwest::Client,
    base_url: String,
}

impl Backend {
    /// Build a client for the given base URL, e.g. `http://localhost:8000`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a successful response, or turn a non-2xx answer into
    /// `ApiError::Api` carrying the backend's `detail` message.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or(body);
        Err(ApiError::Api { status, detail })
    }

    /// Server-side vulnerability-scan defaults, read once at startup.
    pub async fn scan_defaults(&self) -> Result<ScanDefaults, ApiError> {
        let response = self.http.get(self.url("/api/staging/vuln-config")).send().await?;
        Self::decode(response).await
    }

    /// Saved external registries (passwords stay server-side).
    pub async fn registries(&self) -> Result<Vec<ExternalRegistry>, ApiError> {
        let response = self.http.get(self.url("/api/external/registries")).send().await?;
        Self::decode(response).await
    }

    /// Registry statistics for the dashboard.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        let response = self.http.get(self.url("/api/dashboard/stats")).send().await?;
        Self::decode(response).await
    }

    /// Search the remote image catalog.
    pub async fn search_images(
        &self,
        query: &str,
        page: u32,
    ) -> Result<CatalogSearchResponse, ApiError> {
        let response = self
            .http
            .get(self.url("/api/staging/search/dockerhub"))
            .query(&[("q", query), ("page", &page.to_string())])
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Available tags for a catalog image.
    pub async fn image_tags(&self, image: &str) -> Result<Vec<String>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Tags {
            tags: Vec<String>,
        }
        let response = self
            .http
            .get(self.url(&format!("/api/staging/dockerhub/tags/{}", image)))
            .send()
            .await?;
        let tags: Tags = Self::decode(response).await?;
        Ok(tags.tags)
    }
}

#[async_trait]
impl JobStore for Backend {
    async fn create_job(&self, request: &PullRequest) -> Result<StagingJob, ApiError> {
        debug!("Creating staging job for {}:{}", request.image, request.tag);
        let response = self
            .http
            .post(self.url("/api/staging/pull"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn list_jobs(&self) -> Result<Vec<StagingJob>, ApiError> {
        let response = self.http.get(self.url("/api/staging/jobs")).send().await?;
        Self::decode(response).await
    }

    async fn get_job(&self, job_id: &str) -> Result<StagingJob, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/api/staging/jobs/{}", job_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), ApiError> {
        debug!("Deleting staging job {}", job_id);
        let response = self
            .http
            .delete(self.url(&format!("/api/staging/jobs/{}", job_id)))
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn push_local(&self, request: &LocalPushRequest) -> Result<PushAccepted, ApiError> {
        debug!("Starting local push for job {}", request.job_id);
        let response = self
            .http
            .post(self.url("/api/staging/push"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn push_external(
        &self,
        request: &ExternalPushRequest,
    ) -> Result<PushAccepted, ApiError> {
        debug!("Starting external push for job {}", request.job_id);
        let response = self
            .http
            .post(self.url("/api/external/push"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl GcService for Backend {
    async fn start_gc(&self, dry_run: bool) -> Result<GcStatus, ApiError> {
        debug!("Starting registry garbage collection (dry_run={})", dry_run);
        let response = self
            .http
            .post(self.url("/api/system/gc"))
            .query(&[("dry_run", dry_run)])
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn gc_status(&self) -> Result<GcStatus, ApiError> {
        let response = self.http.get(self.url("/api/system/gc/status")).send().await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ClamAvProbe for Backend {
    async fn clamav_status(&self) -> Result<ClamAvStatus, ApiError> {
        let response = self
            .http
            .get(self.url("/api/staging/clamav/status"))
            .send()
            .await?;
        Self::decode(response).await
    }
}
