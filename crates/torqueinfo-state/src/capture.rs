//! Capture a snapshot by running every report concurrently.

use crate::snapshot::Snapshot;
use chrono::{FixedOffset, Utc};
use std::time::Duration;
use thiserror::Error;
use torqueinfo_maui::{FairShareLimits, query_fair_share};
use torqueinfo_parsers::{CommandError, Input, ProcessRunner};
use torqueinfo_pbs::{
    LimitResolver, MissingGroupPolicy, ParseContext, cpu_gpu_totals, query_jobs, query_nodes,
    query_queue_dumps, query_server,
};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Job report failed: {0}")]
    Jobs(#[source] CommandError),
    #[error("Node report failed: {0}")]
    Nodes(#[source] CommandError),
    #[error("Queue report failed: {0}")]
    Queues(#[source] CommandError),
    #[error("Server report failed: {0}")]
    Server(#[source] CommandError),
    #[error("Fair-share report failed: {0}")]
    FairShare(#[source] CommandError),
}

/// Where each report comes from and how it is parsed.
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub pbs_host: Option<String>,
    pub jobs: Input,
    pub nodes: Input,
    pub queues: Input,
    pub server: Input,
    /// `diagnose -g` source; None skips the fair-share report
    pub fair_share: Option<Input>,
    pub maui_keyfile: Option<String>,
    /// Queues to dump one by one; empty dumps them all
    pub queue_names: Vec<String>,
    pub timeout: Option<Duration>,
    pub missing_group: MissingGroupPolicy,
    /// Zone of the timestamps the tools print; None for the local zone
    pub utc_offset: Option<FixedOffset>,
}

impl CaptureConfig {
    fn runner(&self, report: &'static str) -> ProcessRunner {
        ProcessRunner::new()
            .with_timeout(self.timeout)
            .with_span(tracing::debug_span!("report", report))
    }

    fn parse_context(&self) -> ParseContext {
        let ctx = ParseContext::at(Utc::now()).with_missing_group(self.missing_group.clone());
        match self.utc_offset {
            Some(offset) => ctx.with_utc_offset(offset),
            None => ctx,
        }
    }
}

/// Run the job, node, queue, server and (optionally) fair-share reports
/// concurrently and build a snapshot from their results.
///
/// Any failed report fails the whole capture.
pub async fn capture_snapshot(config: &CaptureConfig) -> Result<Snapshot, CaptureError> {
    let ctx = config.parse_context();
    let host = config.pbs_host.as_deref();

    let jobs_runner = config.runner("jobs");
    let nodes_runner = config.runner("nodes");
    let queues_runner = config.runner("queues");
    let server_runner = config.runner("server");
    let fair_share_runner = config.runner("fair_share");

    let fair_share = async {
        match &config.fair_share {
            Some(input) => query_fair_share(
                input,
                host,
                config.maui_keyfile.as_deref(),
                &fair_share_runner,
            )
            .await
            .map(Some),
            None => Ok::<Option<FairShareLimits>, CommandError>(None),
        }
    };

    let (jobs, nodes, queues, server, fair_share) = tokio::join!(
        query_jobs(&config.jobs, host, &jobs_runner, &ctx),
        query_nodes(&config.nodes, host, &[], &nodes_runner),
        query_queue_dumps(&config.queues, host, &config.queue_names, &queues_runner),
        query_server(&config.server, host, &server_runner),
        fair_share,
    );

    let jobs = jobs.map_err(CaptureError::Jobs)?;
    let nodes = nodes.map_err(CaptureError::Nodes)?;
    let queues = queues.map_err(CaptureError::Queues)?;
    let server = server.map_err(CaptureError::Server)?;
    let group_limits = fair_share.map_err(CaptureError::FairShare)?;

    let resolver = LimitResolver::from_server(server.as_ref());

    let mut snapshot = Snapshot::new(ctx.now);
    snapshot.lrms_version = server.as_ref().and_then(|s| s.version.clone());
    snapshot.set_slots(nodes.totals.total_cpus, nodes.totals.free_cpus);
    snapshot.cpu_gpu = cpu_gpu_totals(&nodes.nodes);
    snapshot.nodes = nodes.nodes;
    snapshot.queues = resolver.resolve_all(queues);
    snapshot.server = server;
    snapshot.group_limits = group_limits;
    for job in jobs {
        snapshot.add_job(job);
    }

    tracing::info!(
        jobs = snapshot.job_counts().total,
        queues = snapshot.queues.len(),
        slots_up = ?snapshot.slots_up(),
        slots_free = ?snapshot.slots_free(),
        "captured snapshot"
    );
    Ok(snapshot)
}
