//! Shared parsing utilities for scheduler output.
//!
//! This crate provides the pieces every report parser needs: the process
//! runner that feeds a command's stdout into a [`Collector`], the
//! `KEY = VALUE` line grammar, and the field decoders for durations,
//! memory sizes and `ctime`-style timestamps.

pub mod collector;
pub mod command;
pub mod error;
pub mod memory;
pub mod time;

pub use collector::{Collector, LogicalLines, feed_text, split_key_value};
pub use command::{CommandError, CommandLine, Input, ProcessRunner};
pub use error::DecodeError;
pub use memory::{MemoryUnit, parse_memory_mb};
pub use time::{format_hms, parse_ctime, parse_duration, parse_duration_secs};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "N/A" || trimmed == "[NONE]" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a `True`/`False` attribute value as printed by `qstat`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_string() {
        assert_eq!(non_empty_string("hello"), Some("hello".to_string()));
        assert_eq!(non_empty_string("  hello  "), Some("hello".to_string()));
        assert_eq!(non_empty_string(""), None);
        assert_eq!(non_empty_string("-"), None);
        assert_eq!(non_empty_string("[NONE]"), None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool(" False "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
