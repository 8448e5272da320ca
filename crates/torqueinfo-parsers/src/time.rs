//! Time parsing utilities for scheduler output.

use crate::error::DecodeError;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// C-locale `%c` layout used by `qstat` for `qtime`, `start_time`, `ctime`...
/// (e.g. "Wed Aug 21 11:37:25 2013").
const CTIME_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Parse a PBS duration.
///
/// Supports:
/// - H:M:S (hours may exceed 24, e.g. "36:00:00")
/// - Seconds as integer
/// - "-" meaning zero
pub fn parse_duration(s: &str) -> Result<Duration, DecodeError> {
    let s = s.trim();
    if s == "-" {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(DecodeError::Duration(s.to_string()));
    }

    let mut hms = [0u64; 3];
    for (slot, part) in hms.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| DecodeError::Duration(s.to_string()))?;
    }

    hms[0]
        .checked_mul(3600)
        .and_then(|secs| secs.checked_add(hms[1].checked_mul(60)?))
        .and_then(|secs| secs.checked_add(hms[2]))
        .map(Duration::from_secs)
        .ok_or_else(|| DecodeError::Duration(s.to_string()))
}

/// Like `parse_duration` but returns seconds as u64 instead of Duration.
pub fn parse_duration_secs(s: &str) -> Result<u64, DecodeError> {
    parse_duration(s).map(|d| d.as_secs())
}

/// Format seconds as PBS duration format (H:MM:SS, hours unbounded).
pub fn format_hms(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}:{:02}:{:02}", hours, mins, secs)
}

/// Parse a `ctime`-style timestamp printed without a zone.
///
/// The wall-clock time is interpreted in `offset` when given, otherwise in the
/// host's local zone, and normalized to UTC. Unparsable input is an error,
/// never a default.
pub fn parse_ctime(s: &str, offset: Option<FixedOffset>) -> Result<DateTime<Utc>, DecodeError> {
    let value = s.trim();
    // ctime pads single-digit days with a space ("Aug  1")
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");

    let naive = NaiveDateTime::parse_from_str(&normalized, CTIME_FORMAT).map_err(|e| {
        DecodeError::Timestamp {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    let utc = match offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    };

    utc.ok_or_else(|| DecodeError::Timestamp {
        value: value.to_string(),
        reason: "time does not exist in the local zone".to_string(),
    })
}
