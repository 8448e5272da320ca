//! Resolve queue limits against server-wide defaults.

use crate::types::{Queue, ResourceLimits, ServerInfo};

/// Applies server defaults and CPU-time precedence to queue limits.
///
/// Resolution always starts from the queue's limits as printed, so resolving
/// the same inputs twice gives the same result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitResolver {
    base: ResourceLimits,
}

impl LimitResolver {
    pub fn new(base: ResourceLimits) -> Self {
        Self { base }
    }

    /// Resolver whose base is the server's `resources_*` attributes.
    pub fn from_server(server: Option<&ServerInfo>) -> Self {
        Self::new(server.map(|s| s.limits.clone()).unwrap_or_default())
    }

    pub fn base(&self) -> &ResourceLimits {
        &self.base
    }

    pub fn resolve(&self, raw: &ResourceLimits) -> ResourceLimits {
        let mut limits = raw.clone();
        limits.inherit(&self.base);
        limits.apply_precedence();
        limits
    }

    pub fn resolve_all(&self, queues: Vec<Queue>) -> Vec<Queue> {
        queues
            .into_iter()
            .map(|mut queue| {
                queue.limits = self.resolve(&queue.limits);
                queue
            })
            .collect()
    }
}
