use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the staging backend
    /// Format: http://HOST:PORT
    pub backend_url: String,

    /// Host:port the local registry is reachable under for pushes,
    /// used to render target references (default: localhost:5000)
    pub registry_push_host: String,

    /// Job list poll interval (default: 3s)
    pub poll_interval: Duration,

    /// GC status poll interval (default: 2s)
    pub gc_poll_interval: Duration,

    /// HTTP request timeout (default: 10s)
    pub http_timeout: Duration,

    /// Whether per-job scan-policy overrides are allowed (default: false)
    pub advanced_mode: bool,

    /// Path of the persisted local scan policy (default: regstage-policy.json)
    pub policy_path: String,

    /// Directory for rotated log files (default: logs)
    pub log_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Required environment variables:
    /// - BACKEND_URL: base URL of the staging backend
    ///
    /// Optional environment variables:
    /// - REGISTRY_PUSH_HOST, POLL_INTERVAL_SECS, GC_POLL_INTERVAL_SECS,
    ///   HTTP_TIMEOUT_SECS, ADVANCED_MODE, POLICY_PATH, LOG_DIR
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let backend_url = env::var("BACKEND_URL")
            .map_err(|_| "BACKEND_URL must be set in .env file or environment".to_string())?;

        let registry_push_host =
            env::var("REGISTRY_PUSH_HOST").unwrap_or_else(|_| "localhost:5000".to_string());

        let poll_interval = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let gc_poll_interval = env::var("GC_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        let http_timeout = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let advanced_mode = env::var("ADVANCED_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let policy_path =
            env::var("POLICY_PATH").unwrap_or_else(|_| "regstage-policy.json".to_string());

        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());

        Ok(Config {
            backend_url,
            registry_push_host,
            poll_interval: Duration::from_secs(poll_interval),
            gc_poll_interval: Duration::from_secs(gc_poll_interval),
            http_timeout: Duration::from_secs(http_timeout),
            advanced_mode,
            policy_path,
            log_dir,
        })
    }
}
