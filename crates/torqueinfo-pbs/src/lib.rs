//! Torque/PBS integration for torqueinfo.
//!
//! Query job, node, queue and server state via `qstat` and `pbsnodes`.

pub mod limits;
pub mod pbsnodes;
pub mod qstat;
pub mod qstat_queue;
pub mod qstat_server;
pub mod types;

pub use limits::LimitResolver;
pub use pbsnodes::{
    CpuGpuCollector, NodeCollector, NodeReport, cpu_gpu_totals, parse_gpu_status, query_cpu_gpu,
    query_nodes,
};
pub use qstat::{JobCollector, query_jobs};
pub use qstat_queue::{QueueCollector, query_queue_dumps, query_queues};
pub use qstat_server::{ServerCollector, query_lrms_version, query_server};
pub use types::{
    GpuBlock, GpuReading, JobState, LimitPair, MissingGroupPolicy, Node, NodeTotals,
    ParseContext, PbsJob, Queue, QueueStatus, ResourceLimits, ServerInfo, StartAnchor,
};
