//! Decode errors raised by collectors and field decoders.

use thiserror::Error;

/// A value in a report could not be decoded per its grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid duration '{0}'")]
    Duration(String),
    #[error("Invalid timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },
    #[error("Invalid integer for {key}: '{value}'")]
    Integer { key: String, value: String },
    #[error("Cannot find {field} for job {job_id}")]
    MissingField { field: &'static str, job_id: String },
}

impl DecodeError {
    pub fn integer(key: &str, value: &str) -> Self {
        Self::Integer {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}
