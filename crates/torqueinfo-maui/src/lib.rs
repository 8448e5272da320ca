//! Maui integration for torqueinfo.
//!
//! Query per-group job ceilings via `diagnose -g`.

pub mod diagnose;
pub mod types;

pub use diagnose::{FairShareCollector, diagnose_available, query_fair_share};
pub use types::FairShareLimits;
