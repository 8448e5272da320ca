//! Render a snapshot as JSON or as `attribute: value` text.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use torqueinfo_core::OutputFormat;
use torqueinfo_parsers::format_hms;
use torqueinfo_pbs::{LimitPair, PbsJob, Queue, QueueStatus};
use torqueinfo_state::{JobCounts, Snapshot};

/// Published share DNs per local queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShareMap {
    pub queues: BTreeMap<String, Vec<String>>,
    pub managers: Vec<String>,
}

impl ShareMap {
    /// Add `dn -> queue` entries.
    pub fn add_all(&mut self, map: BTreeMap<String, String>) {
        for (dn, queue) in map {
            self.queues.entry(queue).or_default().push(dn);
        }
    }

    pub fn dns_for(&self, queue: &str) -> &[String] {
        self.queues.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub output_format: OutputFormat,
    pub snapshot: &'a Snapshot,
    pub shares: &'a ShareMap,
    pub vo_jobs: BTreeMap<String, JobCounts>,
}

/// Job counts per VO, through the configured `group -> VO` map.
///
/// Jobs whose group has no VO are left out.
pub fn vo_job_counts(
    snapshot: &Snapshot,
    vomap: &BTreeMap<String, String>,
) -> BTreeMap<String, JobCounts> {
    let mut by_vo: BTreeMap<&str, Vec<&PbsJob>> = BTreeMap::new();
    for job in snapshot.jobs() {
        if let Some(vo) = vomap.get(&job.group) {
            by_vo.entry(vo.as_str()).or_default().push(job);
        }
    }
    by_vo
        .into_iter()
        .map(|(vo, jobs)| (vo.to_string(), JobCounts::from_jobs(jobs)))
        .collect()
}

pub fn render_json(report: &Report<'_>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn render_text(report: &Report<'_>) -> String {
    let snapshot = report.snapshot;
    let mut out = String::new();

    line(&mut out, "output_format", report.output_format);
    line(&mut out, "captured_at", snapshot.captured_at.timestamp());
    if let Some(version) = &snapshot.lrms_version {
        line(&mut out, "lrms_version", version);
    }
    if let (Some(up), Some(free)) = (snapshot.slots_up(), snapshot.slots_free()) {
        line(&mut out, "slots_up", up);
        line(&mut out, "slots_free", free);
    }

    let cpu_gpu = snapshot.cpu_gpu;
    line(&mut out, "cpus_total", cpu_gpu.total_cpus);
    line(&mut out, "cpus_free", cpu_gpu.free_cpus);
    if cpu_gpu.total_gpus > 0 {
        line(&mut out, "gpus_total", cpu_gpu.total_gpus);
        line(&mut out, "gpus_free", cpu_gpu.free_gpus);
    }

    let counts = snapshot.job_counts();
    line(&mut out, "jobs_total", counts.total);
    line(&mut out, "jobs_running", counts.running);
    line(&mut out, "jobs_queued", counts.queued);
    line(&mut out, "jobs_pending", counts.pending);
    line(&mut out, "jobs_done", counts.done);
    line(&mut out, "jobs_unknown", counts.unknown);
    for (vo, counts) in &report.vo_jobs {
        let _ = writeln!(out, "vo_jobs_running: {} {}", vo, counts.running);
        let _ = writeln!(out, "vo_jobs_queued: {} {}", vo, counts.queued);
    }

    for queue in &snapshot.queues {
        out.push('\n');
        render_queue(&mut out, queue, report.shares.dns_for(&queue.name));
    }

    for manager in &report.shares.managers {
        line(&mut out, "manager", manager);
    }

    if let Some(limits) = &snapshot.group_limits {
        out.push('\n');
        for (group, max_jobs) in limits.iter() {
            let _ = writeln!(out, "group_max_jobs: {} {}", group, max_jobs);
        }
    }

    out.truncate(out.trim_end().len());
    out
}

fn render_queue(out: &mut String, queue: &Queue, dns: &[String]) {
    line(out, "queue", &queue.name);
    line(out, "status", status_label(queue.status()));
    if let Some(priority) = &queue.priority {
        line(out, "priority", priority);
    }
    if let Some(n) = queue.max_running {
        line(out, "max_running", n);
    }
    if let Some(n) = queue.max_queuable {
        line(out, "max_queuable", n);
    }

    let limits = &queue.limits;
    durations(out, "cpu_time", &limits.cpu_time);
    durations(out, "wall_time", &limits.walltime);
    numbers(out, "procs", &limits.procs);
    numbers(out, "memory_mb", &limits.mem_mb);
    numbers(out, "vmemory_mb", &limits.vmem_mb);

    for dn in dns {
        line(out, "published", dn);
    }
}

fn status_label(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Production => "Production",
        QueueStatus::Queueing => "Queueing",
        QueueStatus::Draining => "Draining",
        QueueStatus::Closed => "Closed",
    }
}

fn durations(out: &mut String, name: &str, pair: &LimitPair<Duration>) {
    if let Some(max) = pair.max {
        line(out, &format!("max_{}", name), format_hms(max.as_secs()));
    }
    if let Some(default) = pair.default {
        line(out, &format!("default_{}", name), format_hms(default.as_secs()));
    }
}

fn numbers<T: std::fmt::Display + Copy>(out: &mut String, name: &str, pair: &LimitPair<T>) {
    if let Some(max) = pair.max {
        line(out, &format!("max_{}", name), max);
    }
    if let Some(default) = pair.default {
        line(out, &format!("default_{}", name), default);
    }
}

fn line(out: &mut String, key: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{}: {}", key, value);
}
