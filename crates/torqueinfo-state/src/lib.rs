//! Scheduler snapshot for torqueinfo.
//!
//! Captures jobs, nodes, queues and group limits at one instant and answers
//! filtered job queries over them.

pub mod capture;
pub mod snapshot;
pub mod types;

pub use capture::{CaptureConfig, CaptureError, capture_snapshot};
pub use snapshot::Snapshot;
pub use types::{JobCounts, JobFilter};
