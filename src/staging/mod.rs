pub mod board;
pub mod clamav;
pub mod gc;
pub mod policy;
pub mod push;

// Re-export commonly used types
pub use board::{order_active_first, JobBoard};
pub use clamav::ClamAvMonitor;
pub use gc::{GcEvent, GcTracker};
pub use policy::{job_overrides, toggle_severity, PolicyStore, ScanOverrides, ScanPolicy};
pub use push::{AdhocRegistry, PushForm, PushMode, PushPayload, PushTarget};
