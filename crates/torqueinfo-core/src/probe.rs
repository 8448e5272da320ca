//! Status probe that can switch the interface off.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run the status probe and report whether the interface is off.
///
/// The probe is split into words with POSIX shell quoting and run without a
/// shell. Exit code 1 or 2 means off. A probe that cannot be split or run, is
/// killed, or outlives `timeout` leaves the interface on.
pub async fn interface_is_off(probe: &str, timeout: Option<Duration>) -> bool {
    let Some(words) = shlex::split(probe) else {
        tracing::warn!(probe, "cannot split status probe command");
        return false;
    };
    let mut words = words.into_iter();
    let Some(program) = words.next() else {
        return false;
    };

    let mut cmd = Command::new(program);
    cmd.args(words)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(probe, error = %e, "cannot run status probe");
            return false;
        }
    };

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(probe, ?limit, "status probe timed out");
                if let Err(e) = child.kill().await {
                    tracing::warn!(probe, error = %e, "cannot kill status probe");
                }
                return false;
            }
        },
        None => child.wait().await,
    };

    match status {
        Ok(status) => {
            tracing::debug!(probe, code = ?status.code(), "status probe finished");
            matches!(status.code(), Some(1 | 2))
        }
        Err(e) => {
            tracing::debug!(probe, error = %e, "status probe failed");
            false
        }
    }
}
