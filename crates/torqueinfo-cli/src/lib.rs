//! CLI argument parsing for torqueinfo.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use std::time::Duration;
use torqueinfo_core::Config;

pub const DEFAULT_CONFIG: &str = "/etc/lrms/scheduler.conf";

#[derive(Parser, Debug)]
#[command(name = "torqueinfo")]
#[command(about = "Report Torque/PBS and Maui scheduler state")]
pub struct Args {
    /// Provider configuration file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: Utf8PathBuf,

    /// Torque server to query
    #[arg(long)]
    pub pbs_host: Option<String>,

    /// Read `qstat -f` output from a file
    #[arg(long)]
    pub jobs_file: Option<Utf8PathBuf>,

    /// Read `pbsnodes -a` output from a file
    #[arg(long)]
    pub nodes_file: Option<Utf8PathBuf>,

    /// Read `qstat -Q -f` output from a file
    #[arg(long)]
    pub queue_file: Option<Utf8PathBuf>,

    /// Read `qstat -B -f` output from a file
    #[arg(long)]
    pub server_file: Option<Utf8PathBuf>,

    /// Read `diagnose -g` output from a file
    #[arg(long)]
    pub diagnose_file: Option<Utf8PathBuf>,

    /// Queue to report (repeatable; default all)
    #[arg(long = "queue")]
    pub queues: Vec<String>,

    /// Timeout for each scheduler command, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Group recorded for jobs that report none
    #[arg(long)]
    pub fallback_group: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Text,
}

impl Args {
    /// Override file settings with those given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.pbs_host {
            config.pbs_host = Some(host.clone());
        }
        if let Some(secs) = self.timeout {
            config.command_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(group) = &self.fallback_group {
            config.fallback_group = Some(group.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["torqueinfo"]);
        assert_eq!(args.config, DEFAULT_CONFIG);
        assert_eq!(args.format, Format::Text);
        assert!(args.queues.is_empty());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "torqueinfo",
            "--pbs-host",
            "ce02",
            "--timeout",
            "15",
            "--queue",
            "cert",
            "--queue",
            "long",
            "--format",
            "json",
            "-vv",
        ]);
        assert_eq!(args.queues, vec!["cert", "long"]);
        assert_eq!(args.format, Format::Json);
        assert_eq!(args.verbose, 2);

        let mut config = Config {
            pbs_host: Some("ce01".to_string()),
            fallback_group: Some("__localgroup__".to_string()),
            ..Config::default()
        };
        args.apply(&mut config);
        assert_eq!(config.pbs_host.as_deref(), Some("ce02"));
        assert_eq!(config.command_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.fallback_group.as_deref(), Some("__localgroup__"));
    }
}
