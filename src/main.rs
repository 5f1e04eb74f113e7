use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

use regstage::api::models::{JobStatus, PullRequest, Severity, StagingJob};
use regstage::api::{Backend, JobStore};
use regstage::config::Config;
use regstage::poller::Poller;
use regstage::shutdown::ShutdownCoordinator;
use regstage::staging::{
    job_overrides, push, toggle_severity, AdhocRegistry, ClamAvMonitor, GcEvent, GcTracker,
    JobBoard, PolicyStore, PushForm, PushMode, PushPayload, ScanPolicy,
};

/// ClamAV reachability is a health indicator, not pipeline state; a slower
/// cadence than the job list is plenty.
const CLAMAV_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "regstage")]
#[command(version)]
#[command(about = "Console client for a Docker-registry staging backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List staging jobs, active first
    Jobs,

    /// Search the remote image catalog
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// List available tags for a catalog image
    Tags { image: String },

    /// Start a pull + scan pipeline for an image
    Pull {
        /// Image reference, e.g. nginx or library/nginx:1.27
        image: String,
        /// Per-job ClamAV override (requires ADVANCED_MODE)
        #[arg(long)]
        clamav: Option<bool>,
        /// Per-job vulnerability-scan override (requires ADVANCED_MODE)
        #[arg(long)]
        vuln_scan: Option<bool>,
        /// Per-job severities override, comma separated (requires ADVANCED_MODE)
        #[arg(long)]
        severities: Option<String>,
        /// Follow the job until it reaches a terminal status
        #[arg(long)]
        watch: bool,
    },

    /// Push a staged job to the local or an external registry
    Push {
        job_id: String,
        /// Push to an external registry instead of the local one
        #[arg(long)]
        external: bool,
        /// Saved external registry id
        #[arg(long)]
        registry_id: Option<String>,
        /// Ad-hoc external registry host
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Destination folder prefix, e.g. infra or team/base
        #[arg(long)]
        folder: Option<String>,
        /// Rename the image on push
        #[arg(long)]
        image: Option<String>,
        /// Retag the image on push
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete a staging job
    Delete { job_id: String },

    /// Start registry garbage collection
    Gc {
        /// Preview what would be deleted without removing anything
        #[arg(long)]
        dry_run: bool,
        /// Follow the run until it finishes
        #[arg(long)]
        watch: bool,
    },

    /// Show the current garbage-collection status
    GcStatus,

    /// Show or edit the local scan policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Watch the job board and ClamAV health until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
enum PolicyAction {
    /// Print the effective local policy
    Show,

    /// Update policy fields
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        ignore_unfixed: Option<bool>,
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Toggle one severity in the blocking set
    Toggle { severity: String },

    /// Discard the stored preference and re-apply the server default
    Reset,
}

fn init_tracing(log_dir: &str) {
    std::fs::create_dir_all(log_dir).expect("Failed to create logs directory");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "regstage=info".into());

    // Daily-rotating file log; console output goes to stderr so command
    // results on stdout stay clean.
    let log_file = tracing_appender::rolling::daily(log_dir, "regstage.log");
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

/// Split `image[:tag]`, defaulting the tag to `latest`.
fn split_image_ref(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((image, tag)) if !image.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            (image.to_string(), tag.to_string())
        }
        _ => (reference.to_string(), "latest".to_string()),
    }
}

fn parse_severities(csv: &str) -> Result<Vec<Severity>, String> {
    csv.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

fn print_job(job: &StagingJob) {
    let id = job.job_id.get(..8).unwrap_or(&job.job_id);
    println!(
        "{}  {:<14} {:>3}%  {:<40} {}",
        id,
        job.status.to_string(),
        job.progress,
        job.source_ref(),
        job.message
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = Config::from_env().expect("Failed to load configuration");
    init_tracing(&config.log_dir);

    let backend = Arc::new(Backend::new(&config.backend_url, config.http_timeout)?);

    match cli.command {
        Commands::Jobs => {
            let board = JobBoard::new(backend);
            board.load().await?;
            for job in board.snapshot() {
                print_job(&job);
            }
        }

        Commands::Search { query, page } => {
            let response = backend.search_images(&query, page).await?;
            for hit in &response.results {
                let official = if hit.is_official { " [official]" } else { "" };
                println!(
                    "{:<40} ★{:<8} {}{}",
                    hit.name, hit.star_count, hit.description, official
                );
            }
            println!("{} results total", response.count);
        }

        Commands::Tags { image } => {
            for tag in backend.image_tags(&image).await? {
                println!("{}", tag);
            }
        }

        Commands::Pull {
            image,
            clamav,
            vuln_scan,
            severities,
            watch,
        } => {
            let wants_override = clamav.is_some() || vuln_scan.is_some() || severities.is_some();
            if wants_override && !config.advanced_mode {
                return Err(
                    "Per-job scan overrides require ADVANCED_MODE=true; the server default applies"
                        .into(),
                );
            }

            let defaults: ScanPolicy = backend.scan_defaults().await?.into();
            let store = PolicyStore::new(&config.policy_path);
            let mut policy = store.load_or_init(&defaults)?;

            // Per-request layer on top of the stored preference.
            if let Some(enabled) = vuln_scan {
                policy.enabled = enabled;
            }
            if let Some(csv) = &severities {
                policy.severities = parse_severities(csv)?;
            }
            if policy.enabled && policy.severities.is_empty() {
                return Err("An enabled scan policy needs at least one severity".into());
            }

            let (image, tag) = split_image_ref(&image);
            let mut request = PullRequest::new(image, tag);
            request.clamav_enabled_override = clamav;
            job_overrides(config.advanced_mode, &policy).apply(&mut request);
            request.validate()?;

            let board = Arc::new(JobBoard::new(backend));
            let job = board.create(request).await?;
            println!("Job {} created for {}", job.job_id, job.source_ref());

            if watch {
                follow_job(board, &job.job_id, config.poll_interval).await;
            }
        }

        Commands::Push {
            job_id,
            external,
            registry_id,
            host,
            username,
            password,
            folder,
            image,
            tag,
        } => {
            let job = backend.get_job(&job_id).await?;
            if !job.status.is_pushable() {
                return Err(format!(
                    "Job {} is {}; it must pass scanning (or have the scan skipped) before pushing",
                    job_id, job.status
                )
                .into());
            }

            let mode = if external || registry_id.is_some() || host.is_some() {
                PushMode::External
            } else {
                PushMode::Local
            };
            let adhoc = host.map(|host| AdhocRegistry {
                host,
                username: username.unwrap_or_default(),
                password: password.unwrap_or_default(),
            });
            let form = PushForm {
                mode,
                folder,
                target_image: image,
                target_tag: tag,
                registry_id,
                adhoc,
            };
            form.validate()?;

            let saved = if form.registry_id.is_some() {
                backend.registries().await?
            } else {
                Vec::new()
            };

            let target = push::resolve(&form, &job, &config.registry_push_host, &saved)?;
            println!("Pushing {} -> {}", job.source_ref(), target);

            let ack = match push::build_request(&form, &job, &saved)? {
                PushPayload::Local(request) => backend.push_local(&request).await?,
                PushPayload::External(request) => backend.push_external(&request).await?,
            };
            println!("{}", ack.message);
        }

        Commands::Delete { job_id } => {
            let board = JobBoard::new(backend);
            board.delete(&job_id).await?;
            println!("Job {} deleted", job_id);
        }

        Commands::Gc { dry_run, watch } => {
            let tracker = GcTracker::new(backend.clone(), config.gc_poll_interval);
            let mut events = tracker.events();

            let status = tracker.start(dry_run).await?;
            println!("GC {} (dry_run={})", status.status, dry_run);

            if watch {
                let mut rx = tracker.subscribe();
                while !tracker.status().is_terminal() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                    let status = rx.borrow_and_update().clone();
                    println!("GC {}", status.status);
                }

                let status = tracker.status();
                if let Some(output) = &status.output {
                    println!("{}", output);
                }
                if let Some(error) = &status.error {
                    eprintln!("GC failed: {}", error);
                }

                // Completion invalidates the read-only registry views.
                if let Ok(GcEvent::Completed { freed_bytes, .. }) = events.try_recv() {
                    if let Some(freed) = freed_bytes {
                        println!("Freed {} bytes", freed);
                    }
                    let stats = backend.dashboard_stats().await?;
                    println!(
                        "Registry now holds {} images, {} tags ({} bytes)",
                        stats.total_images, stats.total_tags, stats.total_size_bytes
                    );
                }
                tracker.shutdown().await;
            }
        }

        Commands::GcStatus => {
            let tracker = GcTracker::new(backend, config.gc_poll_interval);
            let status = tracker.refresh().await?;
            println!("GC {}", status.status);
            if let Some(output) = &status.output {
                println!("{}", output);
            }
            if let Some(error) = &status.error {
                eprintln!("GC failed: {}", error);
            }
        }

        Commands::Policy { action } => {
            let defaults: ScanPolicy = backend.scan_defaults().await?.into();
            let store = PolicyStore::new(&config.policy_path);

            match action {
                PolicyAction::Show => {
                    let policy = store.load_or_init(&defaults)?;
                    println!("enabled:        {}", policy.enabled);
                    println!("severities:     {}", policy.severities_csv());
                    println!("ignore_unfixed: {}", policy.ignore_unfixed);
                    println!("timeout:        {}", policy.timeout);
                    println!("(server default: {})", defaults.severities_csv());
                }
                PolicyAction::Set {
                    enabled,
                    ignore_unfixed,
                    timeout,
                } => {
                    let mut policy = store.load_or_init(&defaults)?;
                    if let Some(enabled) = enabled {
                        policy.enabled = enabled;
                    }
                    if let Some(ignore_unfixed) = ignore_unfixed {
                        policy.ignore_unfixed = ignore_unfixed;
                    }
                    if let Some(timeout) = timeout {
                        policy.timeout = timeout;
                    }
                    store.save(&policy)?;
                    println!("Policy saved");
                }
                PolicyAction::Toggle { severity } => {
                    let severity: Severity = severity.parse()?;
                    let mut policy = store.load_or_init(&defaults)?;
                    if toggle_severity(&mut policy, severity) {
                        store.save(&policy)?;
                        println!("severities: {}", policy.severities_csv());
                    } else {
                        println!(
                            "Refused: at least one severity must stay selected while scanning is enabled"
                        );
                    }
                }
                PolicyAction::Reset => {
                    let policy = store.reset(&defaults)?;
                    println!("Policy reset to server default: {}", policy.severities_csv());
                }
            }
        }

        Commands::Watch => {
            let board = Arc::new(JobBoard::new(backend.clone()));
            board.load().await?;
            for job in board.snapshot() {
                print_job(&job);
            }

            let clamav = Arc::new(ClamAvMonitor::new(backend.clone()));

            let mut coordinator = ShutdownCoordinator::new();
            coordinator.register("job list", Poller::spawn(board.clone(), config.poll_interval));
            coordinator.register("clamav", Poller::spawn(clamav.clone(), CLAMAV_POLL_INTERVAL));

            info!("Watching staging jobs (CTRL+C to stop)");

            let mut jobs_rx = board.subscribe();
            let mut clamav_rx = clamav.subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = jobs_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let jobs = jobs_rx.borrow_and_update().clone();
                            println!("---");
                            for job in &jobs {
                                print_job(job);
                            }
                        }
                        changed = clamav_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let status = clamav_rx.borrow_and_update().clone();
                            if let Some(status) = status {
                                println!("clamav: {}", status.message);
                            }
                        }
                    }
                }
            });

            coordinator.wait_for_shutdown().await;
            printer.abort();
        }
    }

    Ok(())
}

/// Follow one job on the board until it reaches a terminal status.
async fn follow_job(board: Arc<JobBoard<Backend>>, job_id: &str, interval: Duration) {
    let mut rx = board.subscribe();
    let poller = Poller::spawn(board.clone(), interval);
    let mut last: Option<(JobStatus, u8, String)> = None;

    loop {
        let job = rx
            .borrow_and_update()
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned();

        if let Some(job) = job {
            let line = (job.status, job.progress, job.message.clone());
            if last.as_ref() != Some(&line) {
                println!(
                    "[{:>3}%] {:<14} {}",
                    job.progress,
                    job.status.to_string(),
                    job.message
                );
                last = Some(line);
            }
            if job.status.is_terminal() {
                if let Some(error) = &job.error {
                    eprintln!("Job failed: {}", error);
                }
                break;
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }

    poller.shutdown().await;
}
