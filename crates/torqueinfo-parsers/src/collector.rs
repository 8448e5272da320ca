//! Line-oriented collectors and the `KEY = VALUE` grammar shared by them.

use crate::error::DecodeError;
use once_cell::sync::Lazy;
use regex::Regex;

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^=\s]+)\s*=(.*)$").expect("key/value regex"));

/// A stateful parser fed one report line at a time.
///
/// Collectors never fail while consuming input: anything that cannot be
/// decoded is recorded and reported through [`Collector::errors`] once the
/// stream is finished.
pub trait Collector {
    /// Consume one physical line of output, without its line terminator.
    fn accept_line(&mut self, line: &str);

    /// Called once when the stream reaches end-of-file.
    fn finish(&mut self);

    /// Errors detected while parsing, in the order they were seen.
    fn errors(&self) -> &[DecodeError];
}

/// Feed an in-memory report through a collector.
pub fn feed_text<C: Collector>(mut collector: C, text: &str) -> C {
    for line in text.lines() {
        collector.accept_line(line);
    }
    collector.finish();
    collector
}

/// Split a `KEY = VALUE` line into its key and trimmed value.
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let caps = KEY_VALUE.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str().trim();
    Some((key, value))
}

/// Joins tab-indented continuation lines onto the line they continue.
///
/// `qstat -f` wraps long values (e.g. `Variable_List`) onto following lines
/// that start with a tab. Each complete logical line is handed back once the
/// next one begins, or on [`LogicalLines::finish`].
#[derive(Debug, Default)]
pub struct LogicalLines {
    pending: Option<String>,
}

impl LogicalLines {
    pub fn push(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix('\t') {
            if let Some(pending) = self.pending.as_mut() {
                pending.push_str(rest.trim_start_matches('\t'));
                return None;
            }
        }

        self.pending.replace(line.to_string())
    }

    pub fn finish(&mut self) -> Option<String> {
        self.pending.take()
    }
}
