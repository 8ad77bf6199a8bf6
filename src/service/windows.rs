//! Controller for Windows, where tor runs as a plain child process.
//!
//! Reloading means killing `tor.exe` and spawning a new one. The new process's
//! stderr is drained by a detached task that only logs.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::process::{run_command, tor_process_running};
use super::{ServiceController, ServiceError};
use crate::probe::ReachabilityProbe;

/// Time for the killed tor to release its ports before respawning.
const PORT_RELEASE_DELAY: Duration = Duration::from_secs(1);

pub struct WindowsController {
    probe: ReachabilityProbe,
    ready_timeout: Duration,
    command_timeout: Duration,
}

impl WindowsController {
    pub fn new(
        probe: ReachabilityProbe,
        ready_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            ready_timeout,
            command_timeout,
        }
    }

    async fn kill_tor(&self) -> Result<(), ServiceError> {
        run_command("taskkill", &["/IM", "tor.exe", "/F"], self.command_timeout).await
    }

    fn spawn_tor(&self) -> Result<(), ServiceError> {
        let mut child = Command::new("tor")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                command: "tor".to_string(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr);
        }

        // Detach: tor outlives the handle and is stopped with taskkill
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!("tor exited with {}", status),
                Ok(_) => {}
                Err(e) => warn!("Failed to wait on tor: {}", e),
            }
        });

        Ok(())
    }
}

/// Log every non-empty stderr line of the tor process as an error.
fn drain_stderr(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() {
                error!("tor error: {}", line);
            }
        }
    });
}

#[async_trait]
impl ServiceController for WindowsController {
    fn name(&self) -> &'static str {
        "windows"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting Tor service...");
        self.spawn_tor()
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        info!("Stopping all Tor-related processes...");
        self.kill_tor().await
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        info!("Reloading Tor to request new identity...");

        // taskkill fails when tor is already gone, which is fine here
        if let Err(e) = self.kill_tor().await {
            tracing::debug!("{}", e);
        }
        tokio::time::sleep(PORT_RELEASE_DELAY).await;

        self.spawn_tor()?;

        // Callers drop this future on cancellation
        if !self
            .probe
            .wait_until_ready(self.ready_timeout, &CancellationToken::new())
            .await
        {
            warn!("Restarted tor is not accepting SOCKS connections yet");
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        tor_process_running().await
    }
}
