//! Query fair-share group limits via `diagnose -g`.

use crate::types::FairShareLimits;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use torqueinfo_parsers::{
    Collector, CommandError, CommandLine, DecodeError, Input, ProcessRunner,
};

static MAXJOB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MAXJOB=([0-9,]+)").expect("MAXJOB regex"));

/// Column positions found in the table header.
#[derive(Debug, Clone, Copy)]
struct Columns {
    name: usize,
    limits: usize,
}

/// Collector for the group table of `diagnose -g`.
///
/// Column positions vary between Maui builds, so they are taken from the
/// header row carrying `Name` and `Limits`.
#[derive(Debug, Default)]
pub struct FairShareCollector {
    columns: Option<Columns>,
    limits: FairShareLimits,
    errors: Vec<DecodeError>,
}

impl FairShareCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(&self) -> &FairShareLimits {
        &self.limits
    }

    pub fn into_limits(self) -> FairShareLimits {
        self.limits
    }

    fn handle_row(&mut self, columns: Columns, fields: &[&str]) {
        if fields.len() <= columns.name.max(columns.limits) {
            return;
        }

        let group = fields[columns.name];
        let Some(caps) = MAXJOB.captures(fields[columns.limits]) else {
            return;
        };
        // MAXJOB=soft,hard: the hard limit is in effect
        let Some(value) = caps[1].split(',').rfind(|v| !v.is_empty()) else {
            return;
        };

        match value.parse() {
            Ok(max_jobs) => self.limits.insert(group, max_jobs),
            Err(_) => self.errors.push(DecodeError::integer("MAXJOB", &caps[1])),
        }
    }
}

impl Collector for FairShareCollector {
    fn accept_line(&mut self, line: &str) {
        let fields: Vec<&str> = line.split_whitespace().collect();

        match self.columns {
            Some(columns) => self.handle_row(columns, &fields),
            None => {
                let name = fields.iter().position(|f| *f == "Name");
                let limits = fields.iter().position(|f| *f == "Limits");
                if let (Some(name), Some(limits)) = (name, limits) {
                    self.columns = Some(Columns { name, limits });
                }
            }
        }
    }

    fn finish(&mut self) {}

    fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

/// Query group limits with `diagnose -g [--host=HOST] [--keyfile=FILE]`.
pub async fn query_fair_share(
    input: &Input,
    host: Option<&str>,
    keyfile: Option<&str>,
    runner: &ProcessRunner,
) -> Result<FairShareLimits, CommandError> {
    let cmd = input.command(|| {
        let mut cmd = CommandLine::new("diagnose").arg("-g");
        if let Some(host) = host {
            cmd = cmd.arg(format!("--host={}", host));
        }
        if let Some(keyfile) = keyfile {
            cmd = cmd.arg(format!("--keyfile={}", keyfile));
        }
        cmd
    });

    let collector = runner.run(&cmd, FairShareCollector::new()).await?;
    tracing::debug!(groups = collector.limits().len(), "parsed diagnose output");
    Ok(collector.into_limits())
}

/// Whether a `diagnose` executable is on `PATH`.
pub fn diagnose_available() -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join("diagnose").is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use torqueinfo_parsers::feed_text;

    fn diagnose(group: &str, limit: &str) -> String {
        format!(
            "Displaying group information...
Name         Priority        Flags         QDef      QOSList*        PartitionList Target  Limits

{group}               0       [NONE]       [NONE]       [NONE]                [NONE]   0.00  {limit}
DEFAULT             0       [NONE]       [NONE]       [NONE]                [NONE]   0.00  [NONE]

"
        )
    }

    fn parse(text: &str) -> FairShareCollector {
        feed_text(FairShareCollector::new(), text)
    }

    #[test]
    fn test_single_limit() {
        let collector = parse(&diagnose("dteam", "MAXJOB=50"));
        assert!(collector.errors().is_empty());
        assert_eq!(collector.limits().limit("dteam"), Some(50));
        assert_eq!(collector.limits().limit("DEFAULT"), None);
    }

    #[test]
    fn test_soft_and_hard_limit() {
        let collector = parse(&diagnose("dteam", "MAXJOB=10,50"));
        assert_eq!(collector.limits().limit("dteam"), Some(50));
    }

    #[test]
    fn test_unlimited_group() {
        let collector = parse(&diagnose("dteam", "[NONE]"));
        assert!(collector.limits().is_empty());
    }

    #[test]
    fn test_other_limit_kinds_ignored() {
        let collector = parse(&diagnose("dteam", "MAXPROC=50"));
        assert!(collector.limits().is_empty());
    }

    #[test]
    fn test_columns_from_header() {
        let text = "Limits Name\nMAXJOB=7 atlas\n";
        let collector = parse(text);
        assert_eq!(collector.limits().limit("atlas"), Some(7));
    }

    #[test]
    fn test_no_header_yields_nothing() {
        let collector = parse("dteam 0 MAXJOB=5\n");
        assert!(collector.limits().is_empty());
    }

    #[tokio::test]
    async fn test_query_fair_share_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagnose.txt");
        std::fs::write(&path, diagnose("cms", "MAXJOB=20,30")).unwrap();
        let input = Input::File(camino::Utf8PathBuf::from_path_buf(path).unwrap());

        let limits = query_fair_share(&input, None, None, &ProcessRunner::new())
            .await
            .unwrap();
        assert_eq!(limits.limit("cms"), Some(30));
        assert_eq!(limits.iter().collect::<Vec<_>>(), vec![("cms", 30)]);
    }
}
