//! Maui data types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum concurrent jobs per scheduling group.
///
/// A group without an entry is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FairShareLimits(BTreeMap<String, u32>);

impl FairShareLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: impl Into<String>, max_jobs: u32) {
        self.0.insert(group.into(), max_jobs);
    }

    pub fn limit(&self, group: &str) -> Option<u32> {
        self.0.get(group).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(group, max)| (group.as_str(), *max))
    }
}

impl FromIterator<(String, u32)> for FairShareLimits {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
