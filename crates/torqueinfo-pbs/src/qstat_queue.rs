//! Query queue state via `qstat -Q -f`.

use crate::limits::LimitResolver;
use crate::types::Queue;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinSet;
use torqueinfo_parsers::{
    Collector, CommandError, CommandLine, DecodeError, Input, LogicalLines, ProcessRunner,
    non_empty_string, parse_bool, split_key_value,
};

static QUEUE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Queue:\s*(.+?)\s*$").expect("queue header regex"));

/// Collector for `qstat -Q -f` dumps.
///
/// Limits are stored as printed; [`LimitResolver`] applies server defaults
/// and precedence afterwards.
#[derive(Debug, Default)]
pub struct QueueCollector {
    lines: LogicalLines,
    current: Option<Queue>,
    preselected: bool,
    queues: Vec<Queue>,
    errors: Vec<DecodeError>,
}

impl QueueCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector for the dump of one known queue, with or without its
    /// `Queue:` header.
    pub fn for_queue(name: impl Into<String>) -> Self {
        Self {
            current: Some(Queue::new(name)),
            preselected: true,
            ..Self::default()
        }
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    pub fn into_queues(self) -> Vec<Queue> {
        self.queues
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(caps) = QUEUE_HEADER.captures(line) {
            let name = &caps[1];
            let same_queue = self.current.as_ref().is_some_and(|q| q.name == name);
            if !(self.preselected && same_queue) {
                self.finish_queue();
                self.current = Some(Queue::new(name));
            }
            self.preselected = false;
            return;
        }

        let Some(queue) = self.current.as_mut() else {
            return;
        };
        let Some((key, value)) = split_key_value(line) else {
            return;
        };

        match key {
            "enabled" => queue.enabled = parse_bool(value).unwrap_or(false),
            "started" => queue.started = parse_bool(value).unwrap_or(false),
            "queue_type" => queue.queue_type = non_empty_string(value),
            "Priority" => queue.priority = non_empty_string(value),
            "max_queuable" => match value.parse() {
                Ok(n) => queue.max_queuable = Some(n),
                Err(_) => self.errors.push(DecodeError::integer(key, value)),
            },
            "max_running" => match value.parse() {
                Ok(n) => queue.max_running = Some(n),
                Err(_) => self.errors.push(DecodeError::integer(key, value)),
            },
            _ => match queue.limits.set_attribute(key, value) {
                Ok(true) => {}
                Ok(false) => {
                    queue.extra.insert(key.to_string(), value.to_string());
                }
                Err(e) => self.errors.push(e),
            },
        }
    }

    fn finish_queue(&mut self) {
        if let Some(queue) = self.current.take() {
            self.queues.push(queue);
        }
    }
}

impl Collector for QueueCollector {
    fn accept_line(&mut self, line: &str) {
        if let Some(line) = self.lines.push(line) {
            self.handle_line(&line);
        }
    }

    fn finish(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
        self.finish_queue();
    }

    fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

fn queue_command(name: Option<&str>, host: Option<&str>) -> CommandLine {
    let cmd = CommandLine::new("qstat").args(["-Q", "-f"]);
    match (name, host) {
        (Some(name), Some(host)) => cmd.arg(format!("{}@{}", name, host)),
        (Some(name), None) => cmd.arg(name),
        (None, Some(host)) => cmd.arg(format!("@{}", host)),
        (None, None) => cmd,
    }
}

/// Query queues with `qstat -Q -f <queue>[@host]`, limits as printed.
///
/// Each named queue is dumped by its own process, all running concurrently.
/// With no names every queue is dumped at once. A file input is parsed as a
/// whole and then restricted to `names` when any are given.
pub async fn query_queue_dumps(
    input: &Input,
    host: Option<&str>,
    names: &[String],
    runner: &ProcessRunner,
) -> Result<Vec<Queue>, CommandError> {
    let queues = match input {
        Input::File(_) => {
            let cmd = input.command(|| queue_command(None, host));
            let mut queues = runner.run(&cmd, QueueCollector::new()).await?.into_queues();
            if !names.is_empty() {
                queues.retain(|q| names.contains(&q.name));
            }
            queues
        }
        Input::Live if names.is_empty() => {
            let cmd = queue_command(None, host);
            runner.run(&cmd, QueueCollector::new()).await?.into_queues()
        }
        Input::Live => query_each_queue(host, names, runner).await?,
    };

    tracing::debug!(queues = queues.len(), "parsed qstat -Q output");
    Ok(queues)
}

/// Query queues and resolve their limits against `resolver`.
pub async fn query_queues(
    input: &Input,
    host: Option<&str>,
    names: &[String],
    runner: &ProcessRunner,
    resolver: &LimitResolver,
) -> Result<Vec<Queue>, CommandError> {
    let raw = query_queue_dumps(input, host, names, runner).await?;
    Ok(resolver.resolve_all(raw))
}

async fn query_each_queue(
    host: Option<&str>,
    names: &[String],
    runner: &ProcessRunner,
) -> Result<Vec<Queue>, CommandError> {
    let mut tasks = JoinSet::new();
    for (index, name) in names.iter().enumerate() {
        let cmd = queue_command(Some(name), host);
        let collector = QueueCollector::for_queue(name.clone());
        let runner = runner.clone();
        tasks.spawn(async move { (index, runner.run(&cmd, collector).await) });
    }

    let mut results = Vec::with_capacity(names.len());
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.map_err(|e| CommandError::Execution {
            command: "qstat -Q -f".to_string(),
            error: e.to_string(),
        })?;
        results.push((index, result?.into_queues()));
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().flat_map(|(_, queues)| queues).collect())
}
