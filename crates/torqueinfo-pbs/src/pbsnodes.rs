//! Query node state via `pbsnodes -a`.

use crate::types::{GpuBlock, GpuReading, Node, NodeTotals};
use serde::{Deserialize, Serialize};
use torqueinfo_parsers::{
    Collector, CommandError, CommandLine, DecodeError, Input, LogicalLines, ProcessRunner,
    split_key_value,
};

/// Nodes plus the CPU/GPU aggregates computed over them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub nodes: Vec<Node>,
    pub totals: NodeTotals,
}

/// Collector for `pbsnodes -a` output.
///
/// Every non-indented line names a node; indented `key = value` lines
/// describe it.
#[derive(Debug, Default)]
pub struct NodeCollector {
    lines: LogicalLines,
    current: Option<Node>,
    gpu_readings: Vec<Vec<GpuReading>>,
    nodes: Vec<Node>,
    errors: Vec<DecodeError>,
}

impl NodeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Total slots of usable nodes, and how many of them carry no job.
    pub fn totals(&self) -> NodeTotals {
        let mut totals = NodeTotals::default();
        let mut assigned = 0u32;

        for node in self.nodes.iter().filter(|n| n.usable) {
            totals.total_cpus += node.np;
            assigned += node.assigned_jobs();
            add_gpus(&mut totals, node);
        }

        totals.free_cpus = totals.total_cpus.saturating_sub(assigned);
        totals
    }

    pub fn into_report(self) -> NodeReport {
        let totals = self.totals();
        NodeReport {
            nodes: self.nodes,
            totals,
        }
    }

    fn handle_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        if !line.starts_with(char::is_whitespace) {
            self.finish_node();
            self.current = Some(Node::new(trimmed));
            return;
        }

        let Some(node) = self.current.as_mut() else {
            return;
        };
        let Some((key, value)) = split_key_value(line) else {
            return;
        };

        match key {
            "state" => node.set_state(value),
            "np" => match value.parse() {
                Ok(np) => node.np = np,
                Err(_) => self.errors.push(DecodeError::integer("np", value)),
            },
            "jobs" => {
                // commas + 1 when non-empty, even for blank items
                node.jobs = if value.trim().is_empty() {
                    Vec::new()
                } else {
                    value.split(',').map(|slot| slot.trim().to_string()).collect()
                };
            }
            "gpu_status" => self.gpu_readings.push(parse_gpu_status(value)),
            _ => {
                node.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    fn finish_node(&mut self) {
        let Some(mut node) = self.current.take() else {
            return;
        };

        for readings in self.gpu_readings.drain(..) {
            node.gpus.push(GpuBlock {
                total: readings.len() as u32,
                free: readings.iter().filter(|gpu| gpu.is_free()).count() as u32,
                node_state: node.state.clone(),
            });
        }

        self.nodes.push(node);
    }
}

impl Collector for NodeCollector {
    fn accept_line(&mut self, line: &str) {
        if let Some(line) = self.lines.push(line) {
            self.handle_line(&line);
        }
    }

    fn finish(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
        self.finish_node();
    }

    fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

/// Node collector that counts a slot as free only on nodes in state `free`.
///
/// A busy or job-exclusive node still adds its slots to the total but none
/// to the free count, whatever its `jobs` list says.
#[derive(Debug, Default)]
pub struct CpuGpuCollector {
    nodes: NodeCollector,
    totals: NodeTotals,
}

impl CpuGpuCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> NodeTotals {
        self.totals
    }

    pub fn into_report(self) -> NodeReport {
        NodeReport {
            nodes: self.nodes.nodes,
            totals: self.totals,
        }
    }
}

impl Collector for CpuGpuCollector {
    fn accept_line(&mut self, line: &str) {
        self.nodes.accept_line(line);
    }

    fn finish(&mut self) {
        self.nodes.finish();
        self.totals = cpu_gpu_totals(self.nodes.nodes());
    }

    fn errors(&self) -> &[DecodeError] {
        self.nodes.errors()
    }
}

/// Totals as [`CpuGpuCollector`] counts them.
pub fn cpu_gpu_totals(nodes: &[Node]) -> NodeTotals {
    let mut totals = NodeTotals::default();

    for node in nodes.iter().filter(|n| n.usable) {
        totals.total_cpus += node.np;
        if node.state == "free" {
            totals.free_cpus += node.free_cpus();
        }
        add_gpus(&mut totals, node);
    }

    totals
}

fn add_gpus(totals: &mut NodeTotals, node: &Node) {
    for gpus in &node.gpus {
        totals.total_gpus += gpus.total;
        totals.free_gpus += gpus.free;
    }
}

/// Parse a `gpu_status` value.
///
/// Format: `gpu[1]=gpu_id=...;gpu_utilization=0%;gpu_memory_utilization=0%,gpu[0]=...,driver_ver=...`.
/// Items that are not `gpu[N]=` records are ignored.
pub fn parse_gpu_status(value: &str) -> Vec<GpuReading> {
    let mut readings = Vec::new();

    for item in value.split(',') {
        let Some(rest) = item.trim().strip_prefix("gpu[") else {
            continue;
        };
        let Some((index, attributes)) = rest.split_once("]=") else {
            continue;
        };
        let Ok(index) = index.trim().parse() else {
            continue;
        };

        let mut reading = GpuReading {
            index,
            utilization: None,
            memory_utilization: None,
        };
        for attribute in attributes.split(';') {
            match attribute.split_once('=') {
                Some(("gpu_utilization", v)) => reading.utilization = parse_percent(v),
                Some(("gpu_memory_utilization", v)) => {
                    reading.memory_utilization = parse_percent(v)
                }
                _ => {}
            }
        }
        readings.push(reading);
    }

    readings
}

fn parse_percent(s: &str) -> Option<f64> {
    s.trim().trim_end_matches('%').trim().parse().ok()
}

fn pbsnodes_command(input: &Input, host: Option<&str>, names: &[String]) -> CommandLine {
    input.command(|| {
        let mut cmd = CommandLine::new("pbsnodes");
        if let Some(host) = host {
            cmd = cmd.args(["-s", host]);
        }
        cmd.arg("-a").args(names.iter().cloned())
    })
}

/// Query nodes with `pbsnodes [-s host] -a [node...]`.
pub async fn query_nodes(
    input: &Input,
    host: Option<&str>,
    names: &[String],
    runner: &ProcessRunner,
) -> Result<NodeReport, CommandError> {
    let cmd = pbsnodes_command(input, host, names);
    let collector = runner.run(&cmd, NodeCollector::new()).await?;
    tracing::debug!(nodes = collector.nodes().len(), "parsed pbsnodes output");
    Ok(collector.into_report())
}

/// Query CPU and GPU availability with `pbsnodes [-s host] -a`.
pub async fn query_cpu_gpu(
    input: &Input,
    host: Option<&str>,
    runner: &ProcessRunner,
) -> Result<NodeReport, CommandError> {
    let cmd = pbsnodes_command(input, host, &[]);
    let collector = runner.run(&cmd, CpuGpuCollector::new()).await?;
    Ok(collector.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use torqueinfo_parsers::feed_text;

    const STATUS: &str = "rectime=1376989178,varattr=,jobs=,state=free,loadave=0.00,ncpus=2,opsys=linux";

    fn two_nodes(state1: &str, np1: &str, state2: &str, np2: &str) -> String {
        format!(
            "
# pbsnodes -a
cert-wn64-01.pn.pd.infn.it
     state = {state1}
     np = {np1}
     properties = lcgpro
     ntype = cluster
     status = {STATUS}
     gpus = 0

cert-wn64-03.pn.pd.infn.it
     state = {state2}
     np = {np2}
     properties = lcgpro
     ntype = cluster
     status = {STATUS}
     gpus = 0
"
        )
    }

    #[test]
    fn test_parse_nodes() {
        let collector = feed_text(NodeCollector::new(), &two_nodes("free", "2", "busy", "4"));
        assert!(collector.errors().is_empty());
        let nodes = collector.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "cert-wn64-01.pn.pd.infn.it");
        assert_eq!(nodes[0].np, 2);
        assert_eq!(nodes[1].state, "busy");
        assert_eq!(nodes[1].extra["properties"], "lcgpro");
    }

    #[test]
    fn test_blank_job_slots_still_count() {
        let mut text = two_nodes("free", "4", "free", "4");
        text.push_str("     jobs = 0/a, ,1/b,\n");

        let collector = feed_text(NodeCollector::new(), &text);
        assert_eq!(collector.nodes()[1].assigned_jobs(), 4);
        assert_eq!(collector.nodes()[0].assigned_jobs(), 0);
        assert_eq!(collector.totals().free_cpus, 4);
    }

    #[test]
    fn test_totals_one_free_one_occupied() {
        let mut text = two_nodes("free", "2", "free", "2");
        text.push_str("     jobs = 0/a, 1/b\n");

        let collector = feed_text(NodeCollector::new(), &text);
        assert_eq!(collector.nodes()[1].assigned_jobs(), 2);
        let totals = collector.totals();
        assert_eq!(totals.total_cpus, 4);
        assert_eq!(totals.free_cpus, 2);
    }

    #[test]
    fn test_down_nodes_contribute_nothing() {
        let text = two_nodes("offline,down", "2", "free", "2");
        let totals = feed_text(NodeCollector::new(), &text).totals();
        assert_eq!(totals.total_cpus, 2);
        assert_eq!(totals.free_cpus, 2);

        let totals = feed_text(CpuGpuCollector::new(), &text).totals();
        assert_eq!(totals.total_cpus, 2);
        assert_eq!(totals.free_cpus, 2);
    }

    #[test]
    fn test_non_numeric_np_is_an_error() {
        let collector = feed_text(NodeCollector::new(), &two_nodes("free", "2a", "free", "2"));
        assert_eq!(collector.errors(), &[DecodeError::integer("np", "2a")]);
    }

    #[test]
    fn test_cpu_gpu_all_free() {
        let text = two_nodes("free", "2", "free", "2");
        let totals = feed_text(CpuGpuCollector::new(), &text).totals();
        assert_eq!((totals.total_cpus, totals.free_cpus), (4, 4));
    }

    #[test]
    fn test_cpu_gpu_free_with_jobs() {
        let mut text = two_nodes("free", "2", "free", "4");
        text.push_str("     jobs = 0/15.cert-34.pd.infn.it, 1/16.cert-34.pd.infn.it\n");
        let totals = feed_text(CpuGpuCollector::new(), &text).totals();
        assert_eq!((totals.total_cpus, totals.free_cpus), (6, 4));
    }

    #[test]
    fn test_cpu_gpu_half_busy() {
        let text = two_nodes("busy", "2", "free", "2");
        let totals = feed_text(CpuGpuCollector::new(), &text).totals();
        assert_eq!((totals.total_cpus, totals.free_cpus), (4, 2));
    }

    #[test]
    fn test_parse_gpu_status() {
        let value = "gpu[1]=gpu_id=0000:42:00.0;gpu_product_name=Tesla K20m;gpu_utilization=0%;gpu_memory_utilization=0%,\
                     gpu[0]=gpu_id=0000:04:00.0;gpu_utilization=37%;gpu_memory_utilization=0%,\
                     driver_ver=319.37,timestamp=Wed Aug 21 11:37:25 2013";
        let readings = parse_gpu_status(value);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].index, 1);
        assert!(readings[0].is_free());
        assert_eq!(readings[1].utilization, Some(37.0));
        assert!(!readings[1].is_free());
    }

    #[test]
    fn test_gpu_block_per_node() {
        let text = "gpu01\n     state = free\n     np = 8\n     gpus = 2\n     \
                    gpu_status = gpu[1]=gpu_utilization=0%;gpu_memory_utilization=0%,gpu[0]=gpu_utilization=90%;gpu_memory_utilization=12%,driver_ver=319.37\n\
                    gpu02\n     state = down\n     np = 8\n     \
                    gpu_status = gpu[0]=gpu_utilization=0%;gpu_memory_utilization=0%\n";
        let collector = feed_text(CpuGpuCollector::new(), text);
        let totals = collector.totals();
        assert_eq!((totals.total_gpus, totals.free_gpus), (2, 1));

        let report = collector.into_report();
        let block = &report.nodes[0].gpus[0];
        assert_eq!((block.total, block.free), (2, 1));
        assert_eq!(block.node_state, "free");
        assert_eq!(report.nodes[1].gpus[0].node_state, "down");
    }

    #[test]
    fn test_several_gpu_blocks_on_one_node() {
        let text = "gpu01\n     state = free\n     np = 8\n     \
                    gpu_status = gpu[0]=gpu_utilization=0%;gpu_memory_utilization=0%\n     \
                    gpu_status = gpu[0]=gpu_utilization=5%;gpu_memory_utilization=0%,gpu[1]=gpu_utilization=0%;gpu_memory_utilization=0%\n\
                    wn01\n     state = free\n     np = 2\n";
        let report = feed_text(CpuGpuCollector::new(), text).into_report();

        assert_eq!(report.nodes[0].gpus.len(), 2);
        assert_eq!((report.nodes[0].gpus[1].total, report.nodes[0].gpus[1].free), (2, 1));
        assert!(report.nodes[1].gpus.is_empty());
        assert_eq!((report.totals.total_gpus, report.totals.free_gpus), (3, 2));
    }

    #[test]
    fn test_missing_gpu_readings_are_not_free() {
        let readings = parse_gpu_status("gpu[0]=gpu_id=0000:04:00.0;gpu_utilization=0%");
        assert!(!readings[0].is_free());
    }

    #[test]
    fn test_pbsnodes_command() {
        let names = vec!["wn01".to_string(), "wn02".to_string()];
        assert_eq!(
            pbsnodes_command(&Input::Live, Some("ce.example.org"), &names).to_string(),
            "pbsnodes -s ce.example.org -a wn01 wn02"
        );
        assert_eq!(
            pbsnodes_command(&Input::Live, None, &[]).to_string(),
            "pbsnodes -a"
        );
    }
}
