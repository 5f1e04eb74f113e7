use std::fmt;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::api::models::{
    ExternalPushRequest, ExternalRegistry, LocalPushRequest, StagingJob,
};

/// Host shown in the live preview while the ad-hoc host field is still empty.
pub const ADHOC_HOST_PLACEHOLDER: &str = "registry.example.com";

/// Where a staged image gets pushed.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    #[default]
    Local,
    External,
}

/// Ad-hoc external registry credentials, entered for a single push and
/// never cached across jobs.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct AdhocRegistry {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// Per-job push form state. All fields optional except the mode; defaults
/// are derived from the job itself at resolve time.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default, Validate)]
pub struct PushForm {
    pub mode: PushMode,
    /// Optional destination folder prefix, e.g. `infra` or `team/base`.
    #[validate(custom(function = validate_folder))]
    pub folder: Option<String>,
    /// Optional rename; defaults to the last path segment of the source image.
    pub target_image: Option<String>,
    /// Optional retag; defaults to the job's source tag.
    pub target_tag: Option<String>,
    /// Saved external registry id. Mutually exclusive with `adhoc`.
    pub registry_id: Option<String>,
    /// Ad-hoc external registry. Mutually exclusive with `registry_id`.
    pub adhoc: Option<AdhocRegistry>,
}

/// Folder prefixes are lowercase path segments: alphanumerics plus
/// `-`, `_` and `.`, separated by single slashes.
pub fn validate_folder(folder: &str) -> Result<(), ValidationError> {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok(());
    }
    for segment in trimmed.split('/') {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c));
        if !valid {
            return Err(ValidationError::new("folder")
                .with_message("Folder segments must be lowercase alphanumerics, '-', '_' or '.'".into()));
        }
    }
    Ok(())
}

/// The resolved destination of one push: a single human-readable target
/// reference plus the pieces it was assembled from.
#[derive(Debug, Clone, PartialEq)]
pub struct PushTarget {
    pub mode: PushMode,
    pub registry_host: String,
    pub path: String,
    pub tag: String,
}

impl fmt::Display for PushTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry_host, self.path, self.tag)
    }
}

/// Local validation failures caught before any request is issued
#[derive(Debug, PartialEq)]
pub enum PushError {
    /// External mode with neither a saved registry id nor an ad-hoc host
    MissingExternalTarget,

    /// Saved registry id not present in the registry directory
    UnknownRegistry(String),

    /// Target image name resolves to an empty string
    EmptyTargetImage,

    /// Folder prefix fails the segment rules
    InvalidFolder(String),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::MissingExternalTarget => {
                write!(f, "External push needs a saved registry or an ad-hoc host")
            }
            PushError::UnknownRegistry(id) => write!(f, "Unknown saved registry: {}", id),
            PushError::EmptyTargetImage => write!(f, "Target image name is empty"),
            PushError::InvalidFolder(folder) => write!(f, "Invalid folder prefix: {}", folder),
        }
    }
}

impl std::error::Error for PushError {}

fn normalized_folder(form: &PushForm) -> Result<Option<String>, PushError> {
    let Some(folder) = &form.folder else {
        return Ok(None);
    };
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    if validate_folder(trimmed).is_err() {
        return Err(PushError::InvalidFolder(folder.clone()));
    }
    Ok(Some(trimmed.to_string()))
}

/// Default target image: the last path segment of the source image, so
/// `library/nginx` pushes as `nginx` unless renamed.
fn default_image_name(job: &StagingJob) -> &str {
    job.image.rsplit('/').next().unwrap_or(&job.image)
}

fn resolved_image(form: &PushForm, job: &StagingJob) -> Result<String, PushError> {
    let name = form
        .target_image
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_image_name(job));
    if name.is_empty() {
        return Err(PushError::EmptyTargetImage);
    }
    Ok(name.to_string())
}

fn resolved_tag(form: &PushForm, job: &StagingJob) -> String {
    form.target_tag
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&job.tag)
        .to_string()
}

fn target_path(folder: Option<&str>, image: &str) -> String {
    match folder {
        Some(folder) => format!("{}/{}", folder, image),
        None => image.to_string(),
    }
}

fn saved_host<'a>(
    registry_id: &str,
    saved: &'a [ExternalRegistry],
) -> Result<&'a str, PushError> {
    saved
        .iter()
        .find(|r| r.id == registry_id)
        .map(|r| r.host.as_str())
        .ok_or_else(|| PushError::UnknownRegistry(registry_id.to_string()))
}

/// Resolve the full target reference for a push. Pure: no lookups beyond
/// the provided registry directory, no side effects, so two calls with
/// identical inputs yield identical references.
pub fn resolve(
    form: &PushForm,
    job: &StagingJob,
    local_registry_host: &str,
    saved: &[ExternalRegistry],
) -> Result<PushTarget, PushError> {
    let folder = normalized_folder(form)?;
    let path = target_path(folder.as_deref(), &resolved_image(form, job)?);
    let tag = resolved_tag(form, job);

    let (mode, registry_host) = match form.mode {
        PushMode::Local => (PushMode::Local, local_registry_host.to_string()),
        PushMode::External => {
            let host = if let Some(id) = &form.registry_id {
                saved_host(id, saved)?.to_string()
            } else if let Some(adhoc) = &form.adhoc {
                if adhoc.host.trim().is_empty() {
                    return Err(PushError::MissingExternalTarget);
                }
                adhoc.host.trim().to_string()
            } else {
                return Err(PushError::MissingExternalTarget);
            };
            (PushMode::External, host)
        }
    };

    Ok(PushTarget {
        mode,
        registry_host,
        path,
        tag,
    })
}

/// Lenient variant of [`resolve`] that backs the live preview label while
/// the user is still editing: an unfilled external target falls back to a
/// placeholder host instead of failing.
pub fn preview(
    form: &PushForm,
    job: &StagingJob,
    local_registry_host: &str,
    saved: &[ExternalRegistry],
) -> PushTarget {
    match resolve(form, job, local_registry_host, saved) {
        Ok(target) => target,
        Err(_) => {
            let folder = normalized_folder(form).ok().flatten();
            let image = resolved_image(form, job).unwrap_or_else(|_| job.image.clone());
            PushTarget {
                mode: form.mode,
                registry_host: match form.mode {
                    PushMode::Local => local_registry_host.to_string(),
                    PushMode::External => ADHOC_HOST_PLACEHOLDER.to_string(),
                },
                path: target_path(folder.as_deref(), &image),
                tag: resolved_tag(form, job),
            }
        }
    }
}

/// The request a push submits, one variant per endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    Local(LocalPushRequest),
    External(ExternalPushRequest),
}

/// Build the outgoing push payload for one job. Built fresh per job so
/// ad-hoc credentials are never reused across jobs, and with the saved-id /
/// ad-hoc fields kept mutually exclusive: choosing a saved registry leaves
/// every credential field None, and vice versa.
pub fn build_request(
    form: &PushForm,
    job: &StagingJob,
    saved: &[ExternalRegistry],
) -> Result<PushPayload, PushError> {
    let folder = normalized_folder(form)?;
    let image = resolved_image(form, job)?;
    let tag = resolved_tag(form, job);

    match form.mode {
        PushMode::Local => Ok(PushPayload::Local(LocalPushRequest {
            job_id: job.job_id.clone(),
            target_image: Some(target_path(folder.as_deref(), &image)),
            target_tag: Some(tag),
        })),
        PushMode::External => {
            let (registry_id, adhoc) = if let Some(id) = &form.registry_id {
                // Validate the id now so a stale selection fails locally.
                saved_host(id, saved)?;
                (Some(id.clone()), None)
            } else if let Some(adhoc) = &form.adhoc {
                if adhoc.host.trim().is_empty() {
                    return Err(PushError::MissingExternalTarget);
                }
                (None, Some(adhoc.clone()))
            } else {
                return Err(PushError::MissingExternalTarget);
            };

            Ok(PushPayload::External(ExternalPushRequest {
                job_id: job.job_id.clone(),
                registry_id,
                registry_host: adhoc.as_ref().map(|a| a.host.trim().to_string()),
                registry_username: adhoc.as_ref().map(|a| a.username.clone()),
                registry_password: adhoc.as_ref().map(|a| a.password.clone()),
                folder,
                image_name: Some(image),
                tag: Some(tag),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::JobStatus;

    fn job(image: &str, tag: &str) -> StagingJob {
        StagingJob {
            job_id: "job-1".to_string(),
            status: JobStatus::ScanClean,
            image: image.to_string(),
            tag: tag.to_string(),
            progress: 100,
            message: String::new(),
            scan_result: None,
            vuln_result: None,
            target_image: None,
            target_tag: None,
            error: None,
            clamav_enabled_override: None,
            vuln_scan_enabled_override: None,
            vuln_severities_override: None,
        }
    }

    fn saved() -> Vec<ExternalRegistry> {
        vec![ExternalRegistry {
            id: "reg-1".to_string(),
            name: "corp".to_string(),
            host: "reg.example.com".to_string(),
            username: "svc".to_string(),
        }]
    }

    #[test]
    fn local_mode_uses_local_registry_host() {
        let form = PushForm::default();
        let target = resolve(&form, &job("library/nginx", "1.27"), "localhost:5000", &[]).unwrap();

        assert_eq!(target.to_string(), "localhost:5000/nginx:1.27");
        assert!(!target.to_string().contains("reg.example.com"));
    }

    #[test]
    fn saved_registry_with_folder_and_rename() {
        let form = PushForm {
            mode: PushMode::External,
            folder: Some("infra".to_string()),
            target_image: Some("api".to_string()),
            target_tag: Some("1.2".to_string()),
            registry_id: Some("reg-1".to_string()),
            adhoc: None,
        };
        let target = resolve(&form, &job("acme/api-server", "latest"), "localhost:5000", &saved())
            .unwrap();

        assert_eq!(target.to_string(), "reg.example.com/infra/api:1.2");
    }

    #[test]
    fn resolve_is_idempotent() {
        let form = PushForm {
            mode: PushMode::External,
            folder: Some(" infra/ ".to_string()),
            registry_id: Some("reg-1".to_string()),
            ..PushForm::default()
        };
        let job = job("acme/api", "2.0");
        let first = resolve(&form, &job, "localhost:5000", &saved()).unwrap();
        let second = resolve(&form, &job, "localhost:5000", &saved()).unwrap();

        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.to_string(), "reg.example.com/infra/api:2.0");
    }

    #[test]
    fn external_without_target_is_rejected() {
        let form = PushForm {
            mode: PushMode::External,
            ..PushForm::default()
        };
        assert_eq!(
            resolve(&form, &job("nginx", "latest"), "localhost:5000", &[]),
            Err(PushError::MissingExternalTarget)
        );
    }

    #[test]
    fn preview_falls_back_to_placeholder_host() {
        let form = PushForm {
            mode: PushMode::External,
            folder: Some("infra".to_string()),
            ..PushForm::default()
        };
        let target = preview(&form, &job("library/nginx", "latest"), "localhost:5000", &[]);

        assert_eq!(
            target.to_string(),
            format!("{}/infra/nginx:latest", ADHOC_HOST_PLACEHOLDER)
        );
    }

    #[test]
    fn saved_id_payload_carries_no_credentials() {
        let form = PushForm {
            mode: PushMode::External,
            registry_id: Some("reg-1".to_string()),
            // A leftover ad-hoc block must not leak into the payload.
            adhoc: Some(AdhocRegistry {
                host: "other.example.com".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            }),
            ..PushForm::default()
        };
        let payload = build_request(&form, &job("nginx", "latest"), &saved()).unwrap();

        match payload {
            PushPayload::External(req) => {
                assert_eq!(req.registry_id.as_deref(), Some("reg-1"));
                assert_eq!(req.registry_host, None);
                assert_eq!(req.registry_username, None);
                assert_eq!(req.registry_password, None);
            }
            other => panic!("expected external payload, got {:?}", other),
        }
    }

    #[test]
    fn adhoc_payload_carries_no_registry_id() {
        let form = PushForm {
            mode: PushMode::External,
            adhoc: Some(AdhocRegistry {
                host: "edge.example.com".to_string(),
                username: "deploy".to_string(),
                password: "secret".to_string(),
            }),
            ..PushForm::default()
        };
        let payload = build_request(&form, &job("nginx", "latest"), &[]).unwrap();

        match payload {
            PushPayload::External(req) => {
                assert_eq!(req.registry_id, None);
                assert_eq!(req.registry_host.as_deref(), Some("edge.example.com"));
                assert_eq!(req.registry_username.as_deref(), Some("deploy"));
                assert_eq!(req.registry_password.as_deref(), Some("secret"));
            }
            other => panic!("expected external payload, got {:?}", other),
        }
    }

    #[test]
    fn local_payload_keeps_folder_prefix() {
        let form = PushForm {
            folder: Some("base".to_string()),
            ..PushForm::default()
        };
        let payload = build_request(&form, &job("library/alpine", "3.20"), &[]).unwrap();

        match payload {
            PushPayload::Local(req) => {
                assert_eq!(req.target_image.as_deref(), Some("base/alpine"));
                assert_eq!(req.target_tag.as_deref(), Some("3.20"));
            }
            other => panic!("expected local payload, got {:?}", other),
        }
    }

    #[test]
    fn unknown_saved_registry_fails_locally() {
        let form = PushForm {
            mode: PushMode::External,
            registry_id: Some("gone".to_string()),
            ..PushForm::default()
        };
        assert_eq!(
            build_request(&form, &job("nginx", "latest"), &saved()),
            Err(PushError::UnknownRegistry("gone".to_string()))
        );
    }

    #[test]
    fn folder_segments_are_validated() {
        assert!(validate_folder("infra").is_ok());
        assert!(validate_folder("team/base-images").is_ok());
        assert!(validate_folder("Team").is_err());
        assert!(validate_folder("a//b").is_err());
        assert!(validate_folder("sp ace").is_err());

        let form = PushForm {
            folder: Some("Bad Folder".to_string()),
            ..PushForm::default()
        };
        assert!(matches!(
            resolve(&form, &job("nginx", "latest"), "localhost:5000", &[]),
            Err(PushError::InvalidFolder(_))
        ));
    }
}
