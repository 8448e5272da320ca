//! Command execution for scheduler queries.
//!
//! The runner drains stdout into a [`Collector`] and stderr into a buffer
//! concurrently with waiting on the child, so a tool that fills either pipe
//! can never block.

use crate::collector::Collector;
use crate::error::DecodeError;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{Instrument, Span, debug, warn};

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("Failed to parse output of {command}: {source}")]
    Parse {
        command: String,
        #[source]
        source: DecodeError,
    },
    #[error("Command {command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// An argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `cat <path>`, used to replay a saved report.
    pub fn cat(path: &Utf8Path) -> Self {
        Self::new("cat").arg(path.as_str())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Where a report comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Input {
    /// Run the scheduler tool.
    #[default]
    Live,
    /// Replay a saved dump of the tool's output.
    File(Utf8PathBuf),
}

impl Input {
    /// The command to run: `cat` for a file, otherwise the live command.
    pub fn command(&self, live: impl FnOnce() -> CommandLine) -> CommandLine {
        match self {
            Self::Live => live(),
            Self::File(path) => CommandLine::cat(path),
        }
    }
}

/// Runs one external command per call and feeds its output to a collector.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    span: Span,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            span: tracing::debug_span!("runner"),
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the command and fail with [`CommandError::TimedOut`] if it runs longer.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log into `span` instead of the default `runner` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Execute `command`, feed its stdout to `collector` and hand the
    /// collector back once the process has exited and both streams are drained.
    ///
    /// Failure precedence: collector errors, then a non-zero exit status
    /// (reported with the captured stderr), then I/O failures.
    pub async fn run<C: Collector>(
        &self,
        command: &CommandLine,
        collector: C,
    ) -> Result<C, CommandError> {
        self.execute(command, collector)
            .instrument(self.span.clone())
            .await
    }

    async fn execute<C: Collector>(
        &self,
        command: &CommandLine,
        mut collector: C,
    ) -> Result<C, CommandError> {
        let name = command.to_string();
        let execution = |error: String| CommandError::Execution {
            command: name.clone(),
            error,
        };

        debug!(command = %name, "spawning");
        let mut child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| execution(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| execution("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| execution("stderr was not captured".to_string()))?;

        let drained = async {
            tokio::join!(
                feed_collector(stdout, &mut collector),
                read_to_string(stderr),
                child.wait(),
            )
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, drained).await.ok(),
            None => Some(drained.await),
        };

        let Some((fed, stderr_text, status)) = outcome else {
            let limit = self.timeout.unwrap_or_default();
            warn!(command = %name, ?limit, "timed out, killing");
            if let Err(e) = child.kill().await {
                warn!(command = %name, error = %e, "failed to kill timed out command");
            }
            return Err(CommandError::TimedOut {
                command: name,
                timeout: limit,
            });
        };

        let status = status.map_err(|e| execution(e.to_string()))?;

        if let Some(first) = collector.errors().first() {
            return Err(CommandError::Parse {
                command: name,
                source: first.clone(),
            });
        }

        if !status.success() {
            let stderr = stderr_text.unwrap_or_default();
            return Err(CommandError::Failed {
                command: name,
                stderr: stderr.trim().to_string(),
            });
        }

        fed.map_err(|e| execution(e.to_string()))?;
        stderr_text.map_err(|e| execution(e.to_string()))?;

        debug!(command = %name, "completed");
        Ok(collector)
    }
}

/// Read `stream` line by line into the collector, then finish it.
async fn feed_collector<R, C>(stream: R, collector: &mut C) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    C: Collector,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        collector.accept_line(line.trim_end_matches(['\n', '\r']));
    }

    collector.finish();
    Ok(())
}

async fn read_to_string<R: AsyncRead + Unpin>(mut stream: R) -> io::Result<String> {
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Lines {
        lines: Vec<String>,
        finished: bool,
        errors: Vec<DecodeError>,
        reject: bool,
    }

    impl Collector for Lines {
        fn accept_line(&mut self, line: &str) {
            if self.reject {
                self.errors.push(DecodeError::integer("np", line));
            }
            self.lines.push(line.to_string());
        }

        fn finish(&mut self) {
            self.finished = true;
        }

        fn errors(&self) -> &[DecodeError] {
            &self.errors
        }
    }

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").args(["-c", script])
    }

    #[test]
    fn test_command_line_display() {
        let cmd = CommandLine::new("qstat").args(["-Q", "-f", "cert@host"]);
        assert_eq!(cmd.to_string(), "qstat -Q -f cert@host");
        assert_eq!(cmd.program(), "qstat");
        assert_eq!(cmd.arguments().len(), 3);
    }

    #[test]
    fn test_input_command() {
        let live = Input::Live.command(|| CommandLine::new("pbsnodes").arg("-a"));
        assert_eq!(live.to_string(), "pbsnodes -a");

        let file = Input::File("/tmp/nodes.txt".into())
            .command(|| CommandLine::new("pbsnodes").arg("-a"));
        assert_eq!(file.to_string(), "cat /tmp/nodes.txt");
    }

    #[tokio::test]
    async fn test_run_feeds_lines() {
        let runner = ProcessRunner::new();
        let lines = runner
            .run(&sh("printf 'a\\nb\\n\\nc'"), Lines::default())
            .await
            .unwrap();
        assert_eq!(lines.lines, vec!["a", "b", "", "c"]);
        assert!(lines.finished);
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_reports_stderr() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&sh("echo out; echo boom >&2; exit 3"), Lines::default())
            .await;
        match result {
            Err(CommandError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected result: {:?}", other.map(|l| l.lines)),
        }
    }

    #[tokio::test]
    async fn test_collector_error_takes_precedence_over_exit_code() {
        let runner = ProcessRunner::new();
        let collector = Lines {
            reject: true,
            ..Default::default()
        };
        let result = runner.run(&sh("echo 2a; exit 1"), collector).await;
        match result {
            Err(CommandError::Parse { source, .. }) => {
                assert_eq!(source, DecodeError::integer("np", "2a"))
            }
            other => panic!("unexpected result: {:?}", other.map(|l| l.lines)),
        }
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&CommandLine::new("nonexistent_command_12345"), Lines::default())
            .await;
        assert!(matches!(result, Err(CommandError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(200)));
        let result = runner
            .run(&CommandLine::new("sleep").arg("10"), Lines::default())
            .await;
        assert!(matches!(result, Err(CommandError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams() {
        // Far beyond a pipe buffer on both streams.
        let script = "i=0; while [ $i -lt 20000 ]; do \
                      echo \"out line $i\"; echo \"err line $i\" >&2; i=$((i+1)); done";
        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_secs(60)));
        let lines = runner.run(&sh(script), Lines::default()).await.unwrap();
        assert_eq!(lines.lines.len(), 20000);
        assert_eq!(lines.lines[19999], "out line 19999");
    }
}
