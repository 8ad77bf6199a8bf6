//! Controller for containerized deployments.
//!
//! There is no service manager inside the container, so tor is found with
//! `pidof` and signalled directly: SIGHUP makes it rebuild circuits, SIGTERM
//! stops it. Starting tor is the container entrypoint's job.

use async_trait::async_trait;
use tracing::info;

use super::process::{command_output, parse_pids, send_signal, tor_process_running, Signal};
use super::{ServiceController, ServiceError};

#[derive(Debug, Clone, Default)]
pub struct ContainerController;

impl ContainerController {
    pub fn new() -> Self {
        Self
    }

    async fn tor_pids(&self) -> Result<Vec<i32>, ServiceError> {
        let pids = command_output("pidof", &["tor"])
            .await
            .map(|out| parse_pids(&out))
            .unwrap_or_default();
        if pids.is_empty() {
            return Err(ServiceError::ProcessNotFound);
        }
        Ok(pids)
    }

    async fn signal_all(&self, signal: Signal) -> Result<(), ServiceError> {
        for pid in self.tor_pids().await? {
            send_signal(pid, signal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceController for ContainerController {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        if self.is_running().await {
            return Ok(());
        }
        Err(ServiceError::Unsupported("starting tor in container mode"))
    }

    /// Callers log failures, including a missing tor process.
    async fn stop(&self) -> Result<(), ServiceError> {
        self.signal_all(Signal::Terminate).await?;
        info!("Tor process stopped.");
        Ok(())
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        info!("Reloading Tor to request new identity...");
        self.signal_all(Signal::Hangup).await
    }

    async fn is_running(&self) -> bool {
        tor_process_running().await
    }
}
