//! Query PBS jobs via `qstat -f`.

use crate::types::{JobState, MissingGroupPolicy, ParseContext, PbsJob, StartAnchor};
use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use torqueinfo_parsers::{
    Collector, CommandError, CommandLine, DecodeError, Input, LogicalLines, ProcessRunner,
    non_empty_string, parse_ctime, parse_duration, split_key_value,
};

static JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Job Id:\s*(.+?)\s*$").expect("job id regex"));

/// Attributes of the job currently being read.
#[derive(Debug, Default)]
struct JobRecord {
    job_id: String,
    euser: Option<String>,
    egroup: Option<String>,
    owner: Option<String>,
    name: Option<String>,
    queue: Option<String>,
    state: JobState,
    submit_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    max_walltime: Option<Duration>,
    walltime: Option<Duration>,
    cpu_count: Option<u32>,
    extra: BTreeMap<String, String>,
}

/// Collector for `qstat -f` job dumps.
///
/// A `Job Id:` line starts a record; the record is finished by the next one
/// or by end of stream.
#[derive(Debug)]
pub struct JobCollector {
    ctx: ParseContext,
    lines: LogicalLines,
    current: Option<JobRecord>,
    jobs: Vec<PbsJob>,
    errors: Vec<DecodeError>,
}

impl JobCollector {
    pub fn new(ctx: ParseContext) -> Self {
        Self {
            ctx,
            lines: LogicalLines::default(),
            current: None,
            jobs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn jobs(&self) -> &[PbsJob] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<PbsJob> {
        self.jobs
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(caps) = JOB_ID.captures(line) {
            self.finish_record();
            self.current = Some(JobRecord {
                job_id: caps[1].to_string(),
                ..Default::default()
            });
            return;
        }

        let Some(record) = self.current.as_mut() else {
            return;
        };
        let Some((key, value)) = split_key_value(line) else {
            return;
        };

        match key {
            "euser" => record.euser = non_empty_string(value),
            "egroup" => record.egroup = non_empty_string(value),
            "Job_Owner" => {
                // user@host
                record.owner = value
                    .split_once('@')
                    .map(|(user, _)| user)
                    .and_then(non_empty_string);
            }
            "job_state" => record.state = JobState::from_code(value),
            "queue" => record.queue = non_empty_string(value),
            "Job_Name" => record.name = non_empty_string(value),
            "qtime" => match parse_ctime(value, self.ctx.utc_offset) {
                Ok(t) => record.submit_time = Some(t),
                Err(e) => self.errors.push(e),
            },
            "start_time" => match parse_ctime(value, self.ctx.utc_offset) {
                Ok(t) => record.start_time = Some(t),
                Err(e) => self.errors.push(e),
            },
            "Resource_List.walltime" => match parse_duration(value) {
                Ok(d) => record.max_walltime = Some(d),
                Err(e) => self.errors.push(e),
            },
            "resources_used.walltime" => match parse_duration(value) {
                Ok(d) => record.walltime = Some(d),
                Err(e) => self.errors.push(e),
            },
            "exec_host" => {
                if !value.is_empty() {
                    record.cpu_count = Some(value.matches('+').count() as u32 + 1);
                }
            }
            _ => {
                record.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Validate the current record, reconstruct its timing and store it.
    fn finish_record(&mut self) {
        let Some(record) = self.current.take() else {
            return;
        };

        let Some(user) = record.euser.or(record.owner) else {
            self.errors.push(DecodeError::MissingField {
                field: "user",
                job_id: record.job_id,
            });
            return;
        };

        let group = match (record.egroup, &self.ctx.missing_group) {
            (Some(group), _) => group,
            (None, MissingGroupPolicy::Fallback(sentinel)) => sentinel.clone(),
            (None, MissingGroupPolicy::Error) => {
                self.errors.push(DecodeError::MissingField {
                    field: "group",
                    job_id: record.job_id,
                });
                return;
            }
        };

        let now = self.ctx.now;
        let (start_time, walltime, start_anchor) = match (record.start_time, record.walltime) {
            (Some(start), Some(walltime)) => {
                (Some(start), Some(walltime), Some(StartAnchor::Explicit))
            }
            // just after a job starts, walltime is not printed yet
            (Some(start), None) => (
                Some(start),
                Some(elapsed_since(now, start)),
                Some(StartAnchor::Explicit),
            ),
            // older servers print no start_time
            (None, Some(walltime)) => (
                Some(started_before(now, walltime)),
                Some(walltime),
                Some(StartAnchor::DerivedFromWalltime),
            ),
            (None, None) => (None, None, None),
        };

        self.jobs.push(PbsJob {
            job_id: record.job_id,
            name: record.name,
            user,
            group,
            queue: record.queue,
            state: record.state,
            submit_time: record.submit_time,
            start_time,
            start_anchor,
            max_walltime: record.max_walltime,
            walltime,
            cpu_count: record.cpu_count,
            extra: record.extra,
        });
    }
}

impl Collector for JobCollector {
    fn accept_line(&mut self, line: &str) {
        if let Some(line) = self.lines.push(line) {
            self.handle_line(&line);
        }
    }

    fn finish(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line);
        }
        self.finish_record();
    }

    fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

fn elapsed_since(now: DateTime<Utc>, start: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or(Duration::ZERO)
}

fn started_before(now: DateTime<Utc>, walltime: Duration) -> DateTime<Utc> {
    i64::try_from(walltime.as_secs())
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(now)
}

/// Query all jobs with `qstat -f [@host]`.
pub async fn query_jobs(
    input: &Input,
    host: Option<&str>,
    runner: &ProcessRunner,
    ctx: &ParseContext,
) -> Result<Vec<PbsJob>, CommandError> {
    let cmd = input.command(|| {
        let cmd = CommandLine::new("qstat").arg("-f");
        match host {
            Some(host) => cmd.arg(format!("@{}", host)),
            None => cmd,
        }
    });

    let collector = runner.run(&cmd, JobCollector::new(ctx.clone())).await?;
    tracing::debug!(jobs = collector.jobs().len(), "parsed qstat output");
    Ok(collector.into_jobs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use torqueinfo_parsers::feed_text;

    fn job_dump(serial: &str, state: &str, extra_pair: &str) -> String {
        format!(
            "Job Id: {serial}.cert-34.pd.infn.it
    Job_Name = cream_{serial}
    Job_Owner = dteam013@cert-34.pd.infn.it
    job_state = {state}
    queue = cert
    euser = dteam013
    egroup = dteam
    qtime = Wed Aug 21 11:37:25 2013
    Resource_List.walltime = 36:00:00
    {extra_pair}
    server = cert-34.pd.infn.it
    Variable_List = PBS_O_QUEUE=cert,PBS_O_HOME=/home/dteam013,
\tPBS_O_LANG=en_US.UTF-8,PBS_O_LOGNAME=dteam013,
\tPBS_O_WORKDIR=/var/tmp
    queue_rank = 23

"
        )
    }

    fn ctx() -> ParseContext {
        let now = Utc.with_ymd_and_hms(2013, 8, 21, 12, 0, 0).unwrap();
        ParseContext::at(now).with_utc_offset(FixedOffset::east_opt(0).unwrap())
    }

    fn parse(text: &str, ctx: ParseContext) -> JobCollector {
        feed_text(JobCollector::new(ctx), text)
    }

    #[test]
    fn test_parse_two_jobs() {
        let mut text = job_dump("01", "Q", "dummy1 = None");
        text.push_str(&job_dump("02", "R", "exec_host = wn01/0+wn01/1+wn02/0"));

        let collector = parse(&text, ctx());
        assert!(collector.errors().is_empty());
        let jobs = collector.jobs();
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].job_id, "01.cert-34.pd.infn.it");
        assert_eq!(jobs[0].name.as_deref(), Some("cream_01"));
        assert_eq!(jobs[0].user, "dteam013");
        assert_eq!(jobs[0].group, "dteam");
        assert_eq!(jobs[0].queue.as_deref(), Some("cert"));
        assert_eq!(jobs[0].state, JobState::Queued);
        assert_eq!(jobs[0].submit_time.unwrap().timestamp(), 1377085045);
        assert_eq!(jobs[0].max_walltime, Some(Duration::from_secs(129600)));
        assert_eq!(jobs[0].start_anchor, None);

        assert_eq!(jobs[1].state, JobState::Running);
        assert_eq!(jobs[1].cpu_count, Some(3));
    }

    #[test]
    fn test_continuation_lines_are_joined() {
        let collector = parse(&job_dump("01", "Q", "dummy1 = None"), ctx());
        let vars = &collector.jobs()[0].extra["Variable_List"];
        assert!(vars.ends_with("PBS_O_LOGNAME=dteam013,PBS_O_WORKDIR=/var/tmp"));
        assert_eq!(collector.jobs()[0].extra["queue_rank"], "23");
    }

    #[test]
    fn test_start_time_is_explicit_anchor() {
        let text = job_dump("01", "R", "start_time = Wed Aug 21 11:37:26 2013");
        let collector = parse(&text, ctx());
        let job = &collector.jobs()[0];
        assert_eq!(job.start_time.unwrap().timestamp(), 1377085046);
        assert_eq!(job.start_anchor, Some(StartAnchor::Explicit));
        // walltime = now - start
        assert_eq!(job.walltime, Some(Duration::from_secs(22 * 60 + 34)));
    }

    #[test]
    fn test_walltime_derives_start() {
        let text = job_dump("01", "R", "resources_used.walltime = 01:00:00");
        let ctx = ctx();
        let now = ctx.now;
        let collector = parse(&text, ctx);
        let job = &collector.jobs()[0];
        assert_eq!(job.walltime, Some(Duration::from_secs(3600)));
        assert_eq!(job.start_time.unwrap().timestamp(), now.timestamp() - 3600);
        assert_eq!(job.start_anchor, Some(StartAnchor::DerivedFromWalltime));
    }

    #[test]
    fn test_both_timings_reported() {
        let text = job_dump(
            "01",
            "R",
            "start_time = Wed Aug 21 11:00:00 2013\n    resources_used.walltime = 00:30:00",
        );
        let collector = parse(&text, ctx());
        let job = &collector.jobs()[0];
        assert_eq!(job.walltime, Some(Duration::from_secs(1800)));
        assert_eq!(job.start_anchor, Some(StartAnchor::Explicit));
    }

    #[test]
    fn test_owner_without_egroup() {
        let text = "Job Id: 7.server\n    Job_Owner = alice@ui.example.org\n    job_state = Q\n";

        let collector = parse(text, ctx());
        assert_eq!(
            collector.errors(),
            &[DecodeError::MissingField {
                field: "group",
                job_id: "7.server".to_string()
            }]
        );
        assert!(collector.jobs().is_empty());

        let fallback = ctx().with_missing_group(MissingGroupPolicy::Fallback(
            "__localgroup__".to_string(),
        ));
        let collector = parse(text, fallback);
        assert!(collector.errors().is_empty());
        assert_eq!(collector.jobs()[0].user, "alice");
        assert_eq!(collector.jobs()[0].group, "__localgroup__");
    }

    #[test]
    fn test_euser_preferred_over_owner() {
        let text = "Job Id: 8.server\n    euser = mapped\n    egroup = grp\n    Job_Owner = submitter@ui\n";
        let collector = parse(text, ctx());
        assert_eq!(collector.jobs()[0].user, "mapped");
    }

    #[test]
    fn test_missing_user_drops_record() {
        let text = "Job Id: 9.server\n    egroup = grp\n    job_state = R\n";
        let collector = parse(text, ctx());
        assert!(collector.jobs().is_empty());
        assert!(matches!(
            collector.errors()[0],
            DecodeError::MissingField { field: "user", .. }
        ));
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let text = "Job Id: 10.server\n    euser = u\n    egroup = g\n    qtime = sometime\n";
        let collector = parse(text, ctx());
        assert!(matches!(
            collector.errors()[0],
            DecodeError::Timestamp { .. }
        ));
    }

    #[test]
    fn test_unknown_state_and_empty_stream() {
        let collector = parse("", ctx());
        assert!(collector.jobs().is_empty());
        assert!(collector.errors().is_empty());

        let text = "Job Id: 11.server\n    euser = u\n    egroup = g\n";
        let collector = parse(text, ctx());
        assert_eq!(collector.jobs()[0].state, JobState::Unknown);
    }

    #[tokio::test]
    async fn test_query_jobs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qstat.txt");
        std::fs::write(&path, job_dump("01", "Q", "dummy1 = None")).unwrap();
        let path = camino::Utf8PathBuf::try_from(path).unwrap();

        let jobs = query_jobs(&Input::File(path), None, &ProcessRunner::new(), &ctx())
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_query_jobs_missing_file_fails() {
        let input = Input::File("/nonexistent/qstat.txt".into());
        let result = query_jobs(&input, None, &ProcessRunner::new(), &ctx()).await;
        assert!(matches!(result, Err(CommandError::Failed { .. })));
    }
}
