use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::models::{PullRequest, ScanDefaults, Severity};

/// Vulnerability-scan policy. Three instances exist at any time: the
/// server default, the locally persisted user override, and an optional
/// per-request copy edited just before a job is created.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScanPolicy {
    pub enabled: bool,
    /// Severities that block a push, in display order. Never empty while
    /// `enabled` is true.
    pub severities: Vec<Severity>,
    pub ignore_unfixed: bool,
    /// Scanner timeout as the backend spells it, e.g. `5m`.
    pub timeout: String,
}

impl ScanPolicy {
    pub fn severities_csv(&self) -> String {
        self.severities
            .iter()
            .map(Severity::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<ScanDefaults> for ScanPolicy {
    fn from(defaults: ScanDefaults) -> Self {
        Self {
            enabled: defaults.enabled,
            severities: defaults.severities,
            ignore_unfixed: defaults.ignore_unfixed,
            timeout: defaults.timeout,
        }
    }
}

/// The override fields sent when a job is created. `None` means "use the
/// server default" and must never be collapsed into a plain bool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanOverrides {
    pub vuln_enabled: Option<bool>,
    pub vuln_severities: Option<String>,
}

impl ScanOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    /// Stamp these overrides onto an outgoing pull request.
    pub fn apply(&self, request: &mut PullRequest) {
        request.vuln_scan_enabled_override = self.vuln_enabled;
        request.vuln_severities_override = self.vuln_severities.clone();
    }
}

/// Compute the override fields for one job.
///
/// With advanced mode off both fields are None, so casual users cannot
/// deviate from the administrator-configured policy. With it on, the local
/// policy overrides the server default for that one job only.
pub fn job_overrides(advanced_mode: bool, local: &ScanPolicy) -> ScanOverrides {
    if !advanced_mode {
        return ScanOverrides::none();
    }
    ScanOverrides {
        vuln_enabled: Some(local.enabled),
        vuln_severities: Some(local.severities_csv()),
    }
}

/// Toggle one severity in the selection. Returns false (and leaves the
/// policy untouched) when removal would empty the set while scanning is
/// enabled: at least one blocking severity must stay selected.
pub fn toggle_severity(policy: &mut ScanPolicy, severity: Severity) -> bool {
    if let Some(pos) = policy.severities.iter().position(|s| *s == severity) {
        if policy.enabled && policy.severities.len() == 1 {
            debug!("Refusing to deselect last severity while scanning is enabled");
            return false;
        }
        policy.severities.remove(pos);
    } else {
        policy.severities.push(severity);
    }
    true
}

/// Errors from the local policy store
#[derive(Debug)]
pub enum PolicyError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// Enabled policy with no blocking severities selected
    EmptySeverities,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Io(e) => write!(f, "Policy file error: {}", e),
            PolicyError::Parse(e) => write!(f, "Policy file is not valid JSON: {}", e),
            PolicyError::EmptySeverities => {
                write!(f, "An enabled scan policy needs at least one severity")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<std::io::Error> for PolicyError {
    fn from(err: std::io::Error) -> Self {
        PolicyError::Io(err)
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::Parse(err)
    }
}

/// JSON-file persistence for the user's local policy override.
///
/// On first load the store is seeded from the server default and written
/// out; after that the server default is only applied again through an
/// explicit `reset`, never silently over a stored preference.
pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the stored policy, seeding it from `server_default` when no
    /// preference has been persisted yet.
    pub fn load_or_init(&self, server_default: &ScanPolicy) -> Result<ScanPolicy, PolicyError> {
        if !self.path.exists() {
            info!(
                "No stored scan policy at {}, seeding from server default",
                self.path.display()
            );
            self.save(server_default)?;
            return Ok(server_default.clone());
        }
        let raw = fs::read_to_string(&self.path)?;
        let policy = serde_json::from_str(&raw)?;
        Ok(policy)
    }

    /// Persist the policy, rejecting the empty-severities invariant
    /// violation before anything is written.
    pub fn save(&self, policy: &ScanPolicy) -> Result<(), PolicyError> {
        if policy.enabled && policy.severities.is_empty() {
            return Err(PolicyError::EmptySeverities);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(policy)?)?;
        debug!("Scan policy saved to {}", self.path.display());
        Ok(())
    }

    /// Discard the stored preference and re-apply the server default.
    pub fn reset(&self, server_default: &ScanPolicy) -> Result<ScanPolicy, PolicyError> {
        self.save(server_default)?;
        Ok(server_default.clone())
    }
}
