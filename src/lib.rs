pub mod api;
pub mod config;
pub mod poller;
pub mod shutdown;
pub mod staging;

pub use api::{ApiError, Backend, ClamAvProbe, GcService, JobStore};
pub use config::Config;
pub use poller::{PollTarget, Poller};
pub use staging::{GcTracker, JobBoard, PolicyStore, ScanPolicy};
