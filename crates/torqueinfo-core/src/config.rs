//! Provider configuration file.
//!
//! The file is INI-like: `key = value` (or `key: value`) lines, `#` and `;`
//! comments, and indented lines that continue the previous value. Section
//! headers are accepted but every key is global.

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

static OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:=\s][^:=]*?)\s*[:=]\s*(.*)$").expect("option regex"));

pub const DEFAULT_BDII_CONFIG: &str = "/etc/bdii/bdii.conf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Line {line}: cannot parse '{text}'")]
    Syntax { line: usize, text: String },
    #[error("Unknown output format specified in config file: {0}")]
    UnknownOutputFormat(String),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Which GLUE schema the provider publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Glue1,
    Glue2,
    #[default]
    Both,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glue1 => "glue1",
            Self::Glue2 => "glue2",
            Self::Both => "both",
        }
    }

    pub fn includes_glue1(&self) -> bool {
        matches!(self, Self::Glue1 | Self::Both)
    }

    pub fn includes_glue2(&self) -> bool {
        matches!(self, Self::Glue2 | Self::Both)
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glue1" => Ok(Self::Glue1),
            "glue2" => Ok(Self::Glue2),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::UnknownOutputFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub output_format: OutputFormat,
    pub bdii_configfile: Utf8PathBuf,
    pub pbs_host: Option<String>,
    /// group -> VO
    pub vomap: BTreeMap<String, String>,
    /// Command whose exit code 1 or 2 disables the interface
    pub status_probe: Option<String>,
    /// Group recorded for jobs that report none
    pub fallback_group: Option<String>,
    pub command_timeout: Option<Duration>,
    pub maui_keyfile: Option<Utf8PathBuf>,
    /// Keys this version does not interpret
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            bdii_configfile: Utf8PathBuf::from(DEFAULT_BDII_CONFIG),
            pbs_host: None,
            vomap: BTreeMap::new(),
            status_probe: None,
            fallback_group: None,
            command_timeout: None,
            maui_keyfile: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!(%path, format = %config.output_format, "loaded configuration");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (key, value) in read_options(text)? {
            match key.as_str() {
                "outputformat" => config.output_format = value.parse()?,
                "bdii-configfile" => config.bdii_configfile = Utf8PathBuf::from(value),
                "pbs-host" => config.pbs_host = non_empty(value),
                "vomap" => config.vomap = parse_vomap(&value),
                "status-probe" => config.status_probe = non_empty(value),
                "fallback-group" => config.fallback_group = non_empty(value),
                "command-timeout" => {
                    let secs = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
                    config.command_timeout = Some(Duration::from_secs(secs));
                }
                "maui-keyfile" => config.maui_keyfile = non_empty(value).map(Utf8PathBuf::from),
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown configuration key");
                    config.extra.insert(key, value);
                }
            }
        }

        Ok(config)
    }
}

/// Split the file into lowercased keys and their (possibly multi-line) values.
fn read_options(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut options: Vec<(String, String)> = Vec::new();
    let mut continuing = false;

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if line.starts_with(char::is_whitespace) && continuing {
            if let Some((_, value)) = options.last_mut() {
                value.push('\n');
                value.push_str(trimmed);
            }
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            continuing = false;
            continue;
        }

        let caps = OPTION.captures(trimmed).ok_or_else(|| ConfigError::Syntax {
            line: index + 1,
            text: trimmed.to_string(),
        })?;
        let key = caps[1].to_ascii_lowercase();
        let value = unquote(caps[2].trim()).to_string();

        // a repeated key replaces the earlier value
        options.retain(|(k, _)| *k != key);
        options.push((key, value));
        continuing = true;
    }

    Ok(options)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// `group:vo` entries, one per line or separated by commas.
fn parse_vomap(value: &str) -> BTreeMap<String, String> {
    value
        .split(['\n', ','])
        .filter_map(|entry| {
            let (group, vo) = entry.split_once(':')?;
            let (group, vo) = (group.trim(), vo.trim());
            if group.is_empty() || vo.is_empty() || vo.contains(':') {
                return None;
            }
            Some((group.to_string(), vo.to_string()))
        })
        .collect()
}
