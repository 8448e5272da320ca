//! Torque/PBS record types.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use torqueinfo_parsers::{DecodeError, parse_duration, parse_memory_mb};

/// PBS job state, from the single-letter `job_state` code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Q, W
    Queued,
    /// R, E
    Running,
    /// H, T
    Pending,
    /// C
    Done,
    #[default]
    Unknown,
}

impl JobState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "Q" | "W" => Self::Queued,
            "R" | "E" => Self::Running,
            "H" | "T" => Self::Pending,
            "C" => Self::Done,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Unknown => "unknown",
        }
    }
}

/// Which field the job's start/walltime pair was anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAnchor {
    /// `start_time` was reported.
    Explicit,
    /// Only `resources_used.walltime` was reported; start = now - walltime.
    DerivedFromWalltime,
}

impl StartAnchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::DerivedFromWalltime => "derived_from_walltime",
        }
    }
}

/// PBS job information from `qstat -f`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PbsJob {
    /// Job id, e.g. "15.cert-34.pd.infn.it"
    pub job_id: String,

    /// Job_Name
    pub name: Option<String>,

    pub user: String,

    pub group: String,

    pub queue: Option<String>,

    pub state: JobState,

    /// qtime
    pub submit_time: Option<DateTime<Utc>>,

    pub start_time: Option<DateTime<Utc>>,

    pub start_anchor: Option<StartAnchor>,

    /// Resource_List.walltime
    pub max_walltime: Option<Duration>,

    /// resources_used.walltime (or now - start_time)
    pub walltime: Option<Duration>,

    /// Number of slots in exec_host
    pub cpu_count: Option<u32>,

    /// Attributes without a dedicated field
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl PbsJob {
    /// Look up a field by its query name.
    ///
    /// Known names are `jobid`, `user`, `group`, `queue`, `state`, `name`,
    /// `cpucount` and `start_anchor`; anything else is looked up among the raw
    /// attributes.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "jobid" => Some(self.job_id.clone()),
            "user" => Some(self.user.clone()),
            "group" => Some(self.group.clone()),
            "queue" => self.queue.clone(),
            "state" => Some(self.state.as_str().to_string()),
            "name" => self.name.clone(),
            "cpucount" => self.cpu_count.map(|n| n.to_string()),
            "start_anchor" => self.start_anchor.map(|a| a.as_str().to_string()),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// What to do with a job whose group cannot be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MissingGroupPolicy {
    /// Record a collector error for the job.
    #[default]
    Error,
    /// Use this group name instead (e.g. "__localgroup__").
    Fallback(String),
}

/// Inputs shared by every collector of one snapshot.
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Evaluation instant used to reconstruct missing job timing.
    pub now: DateTime<Utc>,
    /// Zone the tools print timestamps in; the host's local zone when None.
    pub utc_offset: Option<FixedOffset>,
    pub missing_group: MissingGroupPolicy,
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl ParseContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            utc_offset: None,
            missing_group: MissingGroupPolicy::Error,
        }
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn with_missing_group(mut self, policy: MissingGroupPolicy) -> Self {
        self.missing_group = policy;
        self
    }
}

/// One GPU as reported in a node's `gpu_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    /// Index from `gpu[N]`
    pub index: u32,
    /// gpu_utilization, percent
    pub utilization: Option<f64>,
    /// gpu_memory_utilization, percent
    pub memory_utilization: Option<f64>,
}

impl GpuReading {
    /// A GPU is free only when both readings are exactly zero.
    pub fn is_free(&self) -> bool {
        self.utilization == Some(0.0) && self.memory_utilization == Some(0.0)
    }
}

/// GPU availability of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuBlock {
    pub total: u32,
    pub free: u32,
    /// Node state when the GPUs were read
    pub node_state: String,
}

/// A compute node from `pbsnodes -a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,

    /// Raw state, e.g. "free", "job-exclusive", "offline,down"
    pub state: String,

    /// False when the state mentions down or offline
    pub usable: bool,

    /// CPU slots (np)
    pub np: u32,

    /// Slot assignments as listed, e.g. "0/15.server"; every comma-separated
    /// item counts, empty ones included
    pub jobs: Vec<String>,

    /// One block per `gpu_status` line
    #[serde(default)]
    pub gpus: Vec<GpuBlock>,

    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: String::new(),
            usable: false,
            np: 0,
            jobs: Vec::new(),
            gpus: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
        self.usable = !state.contains("down") && !state.contains("offline");
    }

    pub fn assigned_jobs(&self) -> u32 {
        self.jobs.len() as u32
    }

    /// Unassigned slots; zero for an unusable node.
    pub fn free_cpus(&self) -> u32 {
        if self.usable {
            self.np.saturating_sub(self.assigned_jobs())
        } else {
            0
        }
    }
}

/// CPU and GPU aggregates over usable nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTotals {
    pub total_cpus: u32,
    pub free_cpus: u32,
    pub total_gpus: u32,
    pub free_gpus: u32,
}

/// Queue status derived from the enabled/started flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Production,
    Queueing,
    Draining,
    Closed,
}

impl QueueStatus {
    pub fn from_flags(enabled: bool, started: bool) -> Self {
        match (enabled, started) {
            (true, true) => Self::Production,
            (true, false) => Self::Queueing,
            (false, true) => Self::Draining,
            (false, false) => Self::Closed,
        }
    }
}

/// A max/default pair for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPair<T> {
    pub max: Option<T>,
    pub default: Option<T>,
}

impl<T> Default for LimitPair<T> {
    fn default() -> Self {
        Self {
            max: None,
            default: None,
        }
    }
}

impl<T: Copy> LimitPair<T> {
    fn set(&mut self, bound: Bound, value: T) {
        match bound {
            Bound::Max => self.max = Some(value),
            Bound::Default => self.default = Some(value),
        }
    }

    fn inherit(&mut self, base: &Self) {
        self.max = self.max.or(base.max);
        self.default = self.default.or(base.default);
    }

    /// An unset side takes the value of the other.
    fn fill_missing(&mut self) {
        self.max = self.max.or(self.default);
        self.default = self.default.or(self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Max,
    Default,
}

/// `resources_max.*` / `resources_default.*` limits of a queue or server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// cput, capped by pcput once resolved
    pub cpu_time: LimitPair<Duration>,
    /// pcput
    pub pcpu_time: LimitPair<Duration>,
    pub walltime: LimitPair<Duration>,
    /// procct
    pub procs: LimitPair<u32>,
    pub mem_mb: LimitPair<u64>,
    pub vmem_mb: LimitPair<u64>,
}

impl ResourceLimits {
    /// Record a `resources_max.NAME` or `resources_default.NAME` attribute.
    ///
    /// Returns Ok(false) when the key is not a limit this type tracks.
    pub fn set_attribute(&mut self, key: &str, value: &str) -> Result<bool, DecodeError> {
        let (bound, resource) = if let Some(resource) = key.strip_prefix("resources_max.") {
            (Bound::Max, resource)
        } else if let Some(resource) = key.strip_prefix("resources_default.") {
            (Bound::Default, resource)
        } else {
            return Ok(false);
        };

        match resource {
            "cput" => self.cpu_time.set(bound, parse_duration(value)?),
            "pcput" => self.pcpu_time.set(bound, parse_duration(value)?),
            "walltime" => self.walltime.set(bound, parse_duration(value)?),
            "procct" => self.procs.set(
                bound,
                value
                    .trim()
                    .parse()
                    .map_err(|_| DecodeError::integer(key, value))?,
            ),
            "mem" => self.mem_mb.set(bound, parse_memory_mb(value)),
            "vmem" => self.vmem_mb.set(bound, parse_memory_mb(value)),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Take every limit this set lacks from `base`.
    pub fn inherit(&mut self, base: &Self) {
        self.cpu_time.inherit(&base.cpu_time);
        self.pcpu_time.inherit(&base.pcpu_time);
        self.walltime.inherit(&base.walltime);
        self.procs.inherit(&base.procs);
        self.mem_mb.inherit(&base.mem_mb);
        self.vmem_mb.inherit(&base.vmem_mb);
    }

    /// Resolve CPU-time limits and unset max/default sides.
    ///
    /// pcput caps cput when both are present and replaces it when cput is
    /// absent; afterwards a missing max takes the default and vice versa.
    pub fn apply_precedence(&mut self) {
        self.cpu_time.max = cap_cpu_time(self.cpu_time.max, self.pcpu_time.max);
        self.cpu_time.default = cap_cpu_time(self.cpu_time.default, self.pcpu_time.default);

        self.cpu_time.fill_missing();
        self.pcpu_time.fill_missing();
        self.walltime.fill_missing();
        self.procs.fill_missing();
        self.mem_mb.fill_missing();
        self.vmem_mb.fill_missing();
    }
}

fn cap_cpu_time(cput: Option<Duration>, pcput: Option<Duration>) -> Option<Duration> {
    match (cput, pcput) {
        (Some(total), Some(per_process)) => Some(total.min(per_process)),
        (None, Some(per_process)) => Some(per_process),
        (total, None) => total,
    }
}

/// A queue from `qstat -Q -f`, limits already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub enabled: bool,
    pub started: bool,
    pub queue_type: Option<String>,
    /// Priority
    pub priority: Option<String>,
    pub max_queuable: Option<u32>,
    pub max_running: Option<u32>,
    pub limits: ResourceLimits,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            started: false,
            queue_type: None,
            priority: None,
            max_queuable: None,
            max_running: None,
            limits: ResourceLimits::default(),
            extra: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus::from_flags(self.enabled, self.started)
    }
}

/// Server-wide attributes from `qstat -B -f`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    /// pbs_version
    pub version: Option<String>,
    pub default_queue: Option<String>,
    /// Defaults every queue inherits
    pub limits: ResourceLimits,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(h: u64) -> Duration {
        Duration::from_secs(h * 3600)
    }

    #[test]
    fn test_job_state_from_code() {
        assert_eq!(JobState::from_code("Q"), JobState::Queued);
        assert_eq!(JobState::from_code("W"), JobState::Queued);
        assert_eq!(JobState::from_code("R"), JobState::Running);
        assert_eq!(JobState::from_code("E"), JobState::Running);
        assert_eq!(JobState::from_code("H"), JobState::Pending);
        assert_eq!(JobState::from_code("T"), JobState::Pending);
        assert_eq!(JobState::from_code("C"), JobState::Done);
        assert_eq!(JobState::from_code("X"), JobState::Unknown);
    }

    #[test]
    fn test_queue_status() {
        assert_eq!(QueueStatus::from_flags(true, true), QueueStatus::Production);
        assert_eq!(QueueStatus::from_flags(true, false), QueueStatus::Queueing);
        assert_eq!(QueueStatus::from_flags(false, true), QueueStatus::Draining);
        assert_eq!(QueueStatus::from_flags(false, false), QueueStatus::Closed);
    }

    #[test]
    fn test_node_usable() {
        let mut node = Node::new("wn01");
        assert!(!node.usable);
        node.set_state("free");
        assert!(node.usable);
        node.set_state("offline,down");
        assert!(!node.usable);
        node.set_state("job-exclusive,offline");
        assert!(!node.usable);
    }

    #[test]
    fn test_pcput_caps_cput() {
        let mut limits = ResourceLimits::default();
        limits.set_attribute("resources_max.cput", "24:00:00").unwrap();
        limits.set_attribute("resources_max.pcput", "12:00:00").unwrap();
        limits.apply_precedence();
        assert_eq!(limits.cpu_time.max, Some(hours(12)));
    }

    #[test]
    fn test_pcput_overrides_missing_cput() {
        let mut limits = ResourceLimits::default();
        limits.set_attribute("resources_max.pcput", "48:00:00").unwrap();
        limits.apply_precedence();
        assert_eq!(limits.cpu_time.max, Some(hours(48)));
        // default side inherits the resolved max
        assert_eq!(limits.cpu_time.default, Some(hours(48)));
    }

    #[test]
    fn test_max_and_default_fill_each_other() {
        let mut limits = ResourceLimits::default();
        limits.set_attribute("resources_default.walltime", "01:00:00").unwrap();
        limits.set_attribute("resources_max.mem", "4gb").unwrap();
        limits.apply_precedence();
        assert_eq!(limits.walltime.max, Some(hours(1)));
        assert_eq!(limits.mem_mb.default, Some(4096));
        assert_eq!(limits.procs, LimitPair::default());
    }

    #[test]
    fn test_set_attribute_rejects_bad_values() {
        let mut limits = ResourceLimits::default();
        assert!(limits.set_attribute("resources_max.cput", "forever").is_err());
        assert!(limits.set_attribute("resources_max.procct", "8x").is_err());
        assert_eq!(limits.set_attribute("resources_max.nodect", "4"), Ok(false));
        assert_eq!(limits.set_attribute("acl_groups", "dteam"), Ok(false));
    }

    #[test]
    fn test_job_field_lookup() {
        let mut extra = BTreeMap::new();
        extra.insert("server".to_string(), "cert-34".to_string());
        let job = PbsJob {
            job_id: "1.cert".to_string(),
            name: Some("blast".to_string()),
            user: "dteam013".to_string(),
            group: "dteam".to_string(),
            queue: Some("cert".to_string()),
            state: JobState::Running,
            submit_time: None,
            start_time: None,
            start_anchor: Some(StartAnchor::Explicit),
            max_walltime: None,
            walltime: None,
            cpu_count: Some(2),
            extra,
        };
        assert_eq!(job.field("state").as_deref(), Some("running"));
        assert_eq!(job.field("cpucount").as_deref(), Some("2"));
        assert_eq!(job.field("start_anchor").as_deref(), Some("explicit"));
        assert_eq!(job.field("server").as_deref(), Some("cert-34"));
        assert_eq!(job.field("missing"), None);
    }
}
