use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lifecycle status of a staging job as reported by the backend.
///
/// The client never computes transitions itself; a status is an opaque
/// label from the store, classified only as active or terminal so the
/// pollers know whether work is still outstanding.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Pulling,
    Scanning,
    ScanSkipped,
    VulnScanning,
    ScanClean,
    ScanVulnerable,
    ScanInfected,
    Pushing,
    Done,
    Failed,
}

impl JobStatus {
    /// Whether this status means the pipeline is still running server-side.
    ///
    /// `scan_clean` / `scan_skipped` count as terminal here even though a
    /// push can still follow: the job only re-enters the active set once a
    /// push action puts it back into `pushing`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending
                | JobStatus::Pulling
                | JobStatus::Scanning
                | JobStatus::VulnScanning
                | JobStatus::Pushing
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether the staged image is allowed to be pushed.
    pub fn is_pushable(&self) -> bool {
        matches!(self, JobStatus::ScanClean | JobStatus::ScanSkipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Pulling => "pulling",
            JobStatus::Scanning => "scanning",
            JobStatus::ScanSkipped => "scan_skipped",
            JobStatus::VulnScanning => "vuln_scanning",
            JobStatus::ScanClean => "scan_clean",
            JobStatus::ScanVulnerable => "scan_vulnerable",
            JobStatus::ScanInfected => "scan_infected",
            JobStatus::Pushing => "pushing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Vulnerability severity vocabulary shared by the scan policy and the
/// per-severity finding counts in scan reports.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            "UNKNOWN" => Ok(Severity::Unknown),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Result of the vulnerability-scan stage, present only after it ran.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VulnReport {
    pub enabled: bool,
    pub blocked: bool,
    /// Severities that trigger blocking for this job.
    pub severities: Vec<Severity>,
    /// Finding count per severity.
    pub counts: BTreeMap<Severity, u64>,
    /// Full vulnerability list, included only when the backend was asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<serde_json::Value>,
}

/// One staging-pipeline run as observed by the client.
///
/// The `*_override` fields hold the scan-policy values that were actually
/// applied to this job (None = server default), captured at creation time
/// and never mutated afterwards, so a job's policy stays auditable no
/// matter how the user's current settings change.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StagingJob {
    pub job_id: String,
    pub status: JobStatus,
    pub image: String,
    pub tag: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub scan_result: Option<String>,
    #[serde(default)]
    pub vuln_result: Option<VulnReport>,
    #[serde(default)]
    pub target_image: Option<String>,
    #[serde(default)]
    pub target_tag: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub clamav_enabled_override: Option<bool>,
    #[serde(default)]
    pub vuln_scan_enabled_override: Option<bool>,
    #[serde(default)]
    pub vuln_severities_override: Option<String>,
}

impl StagingJob {
    /// Image reference the job was created for, e.g. `library/nginx:1.27`.
    pub fn source_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Request to start a pull + scan pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct PullRequest {
    #[validate(length(min = 1, max = 255, message = "Image name must be 1-255 characters"))]
    pub image: String,
    #[validate(length(min = 1, max = 128, message = "Tag must be 1-128 characters"))]
    pub tag: String,
    pub clamav_enabled_override: Option<bool>,
    pub vuln_scan_enabled_override: Option<bool>,
    pub vuln_severities_override: Option<String>,
}

impl PullRequest {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            clamav_enabled_override: None,
            vuln_scan_enabled_override: None,
            vuln_severities_override: None,
        }
    }
}

/// Push a staged image into the local registry (optional rename/retag).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LocalPushRequest {
    pub job_id: String,
    pub target_image: Option<String>,
    pub target_tag: Option<String>,
}

/// Push a staged image to an external registry.
///
/// `registry_id` (a saved registry) and the ad-hoc `registry_host` /
/// credential fields are mutually exclusive; the push resolver guarantees
/// one side is always None before this ever reaches the wire.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExternalPushRequest {
    pub job_id: String,
    pub registry_id: Option<String>,
    pub registry_host: Option<String>,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    pub folder: Option<String>,
    pub image_name: Option<String>,
    pub tag: Option<String>,
}

/// Acknowledgement returned by both push endpoints.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PushAccepted {
    pub message: String,
    pub job_id: String,
}

/// Phase of the registry garbage collection run.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    Idle,
    Running,
    Done,
    Failed,
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GcPhase::Idle => "idle",
            GcPhase::Running => "running",
            GcPhase::Done => "done",
            GcPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Status of the single global GC operation, overwritten wholesale on each
/// poll and never merged field-by-field.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GcStatus {
    pub status: GcPhase,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub freed_bytes: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl GcStatus {
    pub fn idle() -> Self {
        Self {
            status: GcPhase::Idle,
            started_at: None,
            finished_at: None,
            output: None,
            freed_bytes: None,
            error: None,
            dry_run: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == GcPhase::Running
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, GcPhase::Done | GcPhase::Failed)
    }
}

impl Default for GcStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Reachability of the ClamAV daemon, reported by the backend.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClamAvStatus {
    pub enabled: bool,
    pub reachable: bool,
    pub host: String,
    pub port: u16,
    pub message: String,
}

/// Server-side vulnerability-scan defaults, fetched once at startup.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScanDefaults {
    pub enabled: bool,
    pub severities: Vec<Severity>,
    pub ignore_unfixed: bool,
    pub timeout: String,
}

/// A saved external registry entry. Passwords never leave the backend.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExternalRegistry {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub username: String,
}

/// Read-only registry statistics shown on the dashboard; refreshed after a
/// garbage collection completes.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashboardStats {
    pub total_images: u64,
    pub total_tags: u64,
    pub total_size_bytes: u64,
    pub registry_status: String,
}

/// One hit from the remote image catalog search.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CatalogImage {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default)]
    pub pull_count: u64,
    #[serde(default)]
    pub is_official: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CatalogSearchResponse {
    pub results: Vec<CatalogImage>,
    #[serde(default)]
    pub count: u64,
}
