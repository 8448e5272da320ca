//! Query server-wide attributes via `qstat -B -f`.

use crate::types::ServerInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use torqueinfo_parsers::{
    Collector, CommandError, CommandLine, DecodeError, Input, LogicalLines, ProcessRunner,
    non_empty_string, split_key_value,
};

static SERVER_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Server:\s*(.+?)\s*$").expect("server header regex"));

/// Collector for `qstat -B -f`. Keeps the first server in the dump.
#[derive(Debug, Default)]
pub struct ServerCollector {
    lines: LogicalLines,
    server: Option<ServerInfo>,
    done: bool,
    errors: Vec<DecodeError>,
}

impl ServerCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    pub fn into_server(self) -> Option<ServerInfo> {
        self.server
    }

    fn handle_line(&mut self, line: &str) {
        if self.done {
            return;
        }

        if let Some(caps) = SERVER_HEADER.captures(line) {
            if self.server.is_some() {
                self.done = true;
                return;
            }
            self.server = Some(ServerInfo {
                name: caps[1].to_string(),
                ..Default::default()
            });
            return;
        }

        let Some(server) = self.server.as_mut() else {
            return;
        };
        let Some((key, value)) = split_key_value(line) else {
            return;
        };

        match key {
            "pbs_version" => server.version = non_empty_string(value),
            "default_queue" => server.default_queue = non_empty_string(value),
            _ => match server.limits.set_attribute(key, value) {
                Ok(true) => {}
                Ok(false) => {
                    server.extra.insert(key.to_string(), value.to_string());
                }
                Err(e) => self.errors.push(e),
            },
        }
    }
}

impl Collector for ServerCollector {
    fn accept_line(&mut self, line: &str) {
        if let Some(line) = self.lines.push(line) {
            self.handle_line(&line);
        }
    }

    fn finish(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
    }

    fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

/// Query the server with `qstat -B -f [@host]`.
pub async fn query_server(
    input: &Input,
    host: Option<&str>,
    runner: &ProcessRunner,
) -> Result<Option<ServerInfo>, CommandError> {
    let cmd = input.command(|| {
        let cmd = CommandLine::new("qstat").args(["-B", "-f"]);
        match host {
            Some(host) => cmd.arg(format!("@{}", host)),
            None => cmd,
        }
    });

    let collector = runner.run(&cmd, ServerCollector::new()).await?;
    Ok(collector.into_server())
}

/// The `pbs_version` the server reports, if any.
pub async fn query_lrms_version(
    input: &Input,
    host: Option<&str>,
    runner: &ProcessRunner,
) -> Result<Option<String>, CommandError> {
    let server = query_server(input, host, runner).await?;
    Ok(server.and_then(|s| s.version))
}
