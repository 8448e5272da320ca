//! One captured view of the scheduler.

use crate::types::{JobCounts, JobFilter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use torqueinfo_maui::FairShareLimits;
use torqueinfo_pbs::{Node, NodeTotals, PbsJob, Queue, ServerInfo};

/// Jobs, nodes, queues and limits captured at `captured_at`.
///
/// Filtered job queries are memoized per filter for the life of the
/// snapshot. Adding or deleting a job drops every memoized result.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub lrms_version: Option<String>,
    pub server: Option<ServerInfo>,
    pub nodes: Vec<Node>,
    /// CPU/GPU availability, free slots counted on `free` nodes only
    pub cpu_gpu: NodeTotals,
    pub queues: Vec<Queue>,
    /// None when the fair-share report was not queried
    pub group_limits: Option<FairShareLimits>,
    slots_up: Option<u32>,
    slots_free: Option<u32>,
    jobs: BTreeMap<String, PbsJob>,
    #[serde(skip)]
    cache: HashMap<JobFilter, Arc<Vec<PbsJob>>>,
    #[serde(skip)]
    last_query: Option<JobFilter>,
}

impl Snapshot {
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            lrms_version: None,
            server: None,
            nodes: Vec::new(),
            cpu_gpu: NodeTotals::default(),
            queues: Vec::new(),
            group_limits: None,
            slots_up: None,
            slots_free: None,
            jobs: BTreeMap::new(),
            cache: HashMap::new(),
            last_query: None,
        }
    }

    /// Slots on usable nodes; None until node state has been recorded.
    pub fn slots_up(&self) -> Option<u32> {
        self.slots_up
    }

    /// Usable slots with no job assigned.
    pub fn slots_free(&self) -> Option<u32> {
        self.slots_free
    }

    pub fn set_slots(&mut self, up: u32, free: u32) {
        self.slots_up = Some(up);
        self.slots_free = Some(free);
    }

    pub fn jobs(&self) -> impl Iterator<Item = &PbsJob> {
        self.jobs.values()
    }

    pub fn get_job(&self, job_id: &str) -> Option<&PbsJob> {
        self.jobs.get(job_id)
    }

    /// Insert or replace a job, keyed by its id.
    pub fn add_job(&mut self, job: PbsJob) {
        self.invalidate();
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub fn delete_job(&mut self, job_id: &str) -> Option<PbsJob> {
        let removed = self.jobs.remove(job_id);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    fn invalidate(&mut self) {
        self.cache.clear();
        self.last_query = None;
    }

    /// Jobs matching every predicate of `filter`, ordered by job id.
    ///
    /// The result is shared with later calls for an equal filter.
    pub fn matching_jobs(&mut self, filter: &JobFilter) -> Arc<Vec<PbsJob>> {
        if let Some(hit) = self.cache.get(filter) {
            return Arc::clone(hit);
        }

        let view: Arc<Vec<PbsJob>> = Arc::new(
            self.jobs
                .values()
                .filter(|job| filter.matches(job))
                .cloned()
                .collect(),
        );
        self.cache.insert(filter.clone(), Arc::clone(&view));
        view
    }

    /// Number of jobs matching `filter`; remembered as the last query.
    pub fn nmatch(&mut self, filter: &JobFilter) -> usize {
        if filter.is_empty() {
            self.last_query = None;
            return self.jobs.len();
        }

        let count = self.matching_jobs(filter).len();
        self.last_query = Some(filter.clone());
        count
    }

    /// Jobs selected by the last [`nmatch`](Self::nmatch), or all jobs.
    pub fn jobs_last_query(&self) -> Vec<&PbsJob> {
        match self.last_query.as_ref().and_then(|filter| self.cache.get(filter)) {
            Some(view) => view.iter().collect(),
            None => self.jobs.values().collect(),
        }
    }

    pub fn job_ids_last_query(&self) -> Vec<&str> {
        self.jobs_last_query()
            .into_iter()
            .map(|job| job.job_id.as_str())
            .collect()
    }

    /// Ids of jobs matching `filter`, without touching the memo.
    pub fn job_ids(&self, filter: &JobFilter) -> Vec<&str> {
        self.jobs
            .values()
            .filter(|job| filter.matches(job))
            .map(|job| job.job_id.as_str())
            .collect()
    }

    pub fn job_counts(&self) -> JobCounts {
        JobCounts::from_jobs(self.jobs.values())
    }
}
