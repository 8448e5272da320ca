//! Query and summary types over the job set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use torqueinfo_pbs::{JobState, PbsJob};

/// A set of `field = value` predicates, all of which must hold.
///
/// Field names are those of [`PbsJob::field`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFilter(BTreeMap<String, String>);

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `key.value.key.value...` with keys sorted, for display and logs.
    ///
    /// Dots are not escaped, so distinct filters may print alike; compare
    /// filters themselves to tell them apart.
    pub fn signature(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{}.{}", key, value))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn matches(&self, job: &PbsJob) -> bool {
        self.0
            .iter()
            .all(|(key, value)| job.field(key).as_deref() == Some(value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub pending: usize,
    pub done: usize,
    pub unknown: usize,
}

impl JobCounts {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a PbsJob>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Pending => counts.pending += 1,
                JobState::Done => counts.done += 1,
                JobState::Unknown => counts.unknown += 1,
            }
            counts.total += 1;
        }
        counts
    }
}
