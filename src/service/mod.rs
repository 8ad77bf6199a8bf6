//! Control of the local Tor service.
//!
//! Core logic only sees the [`ServiceController`] capability. Each way of
//! reaching the tor process is a separate implementation, picked once at
//! startup by [`select_controller`]:
//!
//! - **systemd** (`systemctl`) on Arch and Manjaro
//! - **SysV** (`service`) on other Linux distributions
//! - **Homebrew services** on macOS
//! - **Windows**: tor is spawned and killed directly
//! - **Container**: tor is signalled by pid (`DOCKER_ENV` set)

mod container;
mod install;
mod platform;
mod process;
mod system;
mod windows;

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;
use crate::probe::ReachabilityProbe;

pub use container::ContainerController;
pub use install::{auto_fix, find_tor_binary, is_tor_installed};
pub use platform::Platform;
pub use process::terminate_other_instances;
pub use system::{ServiceManager, SystemServiceController};
pub use windows::WindowsController;

/// Errors from starting, stopping or reloading tor.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("No running Tor process found")]
    ProcessNotFound,

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Start, stop and reload the underlying Tor process.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;

    /// Ask tor for a fresh identity.
    async fn reload(&self) -> Result<(), ServiceError>;

    async fn is_running(&self) -> bool;
}

/// Pick the controller for this host.
pub fn select_controller(settings: &Settings) -> Arc<dyn ServiceController> {
    if settings.container_mode {
        tracing::debug!("Container mode: signalling tor directly");
        return Arc::new(ContainerController::new());
    }

    let platform = Platform::detect();
    tracing::debug!("Detected platform: {}", platform);

    match platform {
        Platform::ArchLinux => Arc::new(SystemServiceController::new(
            ServiceManager::Systemd,
            settings.command_timeout(),
        )),
        Platform::Linux => Arc::new(SystemServiceController::new(
            ServiceManager::SysV,
            settings.command_timeout(),
        )),
        Platform::MacOs => Arc::new(SystemServiceController::new(
            ServiceManager::Homebrew,
            settings.command_timeout(),
        )),
        Platform::Windows => Arc::new(WindowsController::new(
            ReachabilityProbe::from_settings(settings),
            settings.ready_timeout(),
            settings.command_timeout(),
        )),
    }
}
