//! External command and process helpers shared by the controllers.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use super::ServiceError;

/// Render a command line for logs and errors.
pub(crate) fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upper bound for read-only queries such as `pgrep` and `brew list`.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a command to completion, failing on a non-zero exit.
///
/// A command still running after `limit` is killed and reported as
/// [`ServiceError::TimedOut`].
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<(), ServiceError> {
    let command = display_command(program, args);
    tracing::debug!("Running `{}`", command);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServiceError::Spawn {
            command: command.clone(),
            source,
        })?;

    let status = match timeout(limit, child.wait()).await {
        Ok(status) => status.map_err(|source| ServiceError::Spawn {
            command: command.clone(),
            source,
        })?,
        Err(_) => {
            tracing::warn!(
                "`{}` did not finish within {}s, killing it",
                command,
                limit.as_secs()
            );
            return Err(ServiceError::TimedOut {
                command,
                timeout: limit,
            });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(ServiceError::CommandFailed { command, status })
    }
}

/// Run a command and capture stdout. `None` when it fails to run, exits
/// non-zero, or outlives the query timeout.
pub(crate) async fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match timeout(QUERY_TIMEOUT, output).await {
        Ok(output) => output.ok()?,
        Err(_) => {
            tracing::debug!("`{}` timed out", display_command(program, args));
            return None;
        }
    };

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check for a running tor process.
pub(crate) async fn tor_process_running() -> bool {
    if cfg!(windows) {
        command_output("tasklist", &[])
            .await
            .is_some_and(|out| out.to_lowercase().contains("tor.exe"))
    } else {
        command_output("pgrep", &["-x", "tor"]).await.is_some()
    }
}

/// Parse whitespace separated pids as printed by `pidof` and `pgrep`.
pub(crate) fn parse_pids(output: &str) -> Vec<i32> {
    output
        .split_whitespace()
        .filter_map(|pid| pid.parse().ok())
        .filter(|pid| *pid > 0)
        .collect()
}

/// Signals the container controller sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Hangup,
    Terminate,
}

#[cfg(unix)]
pub(crate) fn send_signal(pid: i32, signal: Signal) -> Result<(), ServiceError> {
    let signo = match signal {
        Signal::Hangup => libc::SIGHUP,
        Signal::Terminate => libc::SIGTERM,
    };
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    let rc = unsafe { libc::kill(pid, signo) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ServiceError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
pub(crate) fn send_signal(_pid: i32, _signal: Signal) -> Result<(), ServiceError> {
    Err(ServiceError::Unsupported("signalling processes"))
}

/// Terminate other running instances of this tool, leaving the current process alone.
///
/// Returns the number of processes signalled.
pub async fn terminate_other_instances(tool_name: &str) -> usize {
    if cfg!(windows) {
        return 0;
    }

    let Some(output) = command_output("pgrep", &["-f", tool_name]).await else {
        return 0;
    };

    let own_pid = std::process::id() as i32;
    let mut terminated = 0;
    for pid in parse_pids(&output).into_iter().filter(|pid| *pid != own_pid) {
        match send_signal(pid, Signal::Terminate) {
            Ok(()) => terminated += 1,
            Err(e) => tracing::debug!("Could not terminate {}: {}", pid, e),
        }
    }
    terminated
}
