//! Service-manager backed controllers (systemd, SysV, Homebrew).

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::process::{run_command, tor_process_running};
use super::{ServiceController, ServiceError};

/// How tor is managed on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    /// `sudo systemctl <action> tor`
    Systemd,
    /// `sudo service tor <action>`
    SysV,
    /// `brew services <action> tor`
    Homebrew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Reload,
}

impl ServiceManager {
    fn command(&self, action: Action) -> (&'static str, Vec<&'static str>) {
        match self {
            ServiceManager::Systemd => {
                let verb = match action {
                    Action::Start => "start",
                    Action::Stop => "stop",
                    Action::Reload => "reload",
                };
                ("sudo", vec!["systemctl", verb, "tor"])
            }
            ServiceManager::SysV => {
                let verb = match action {
                    Action::Start => "start",
                    Action::Stop => "stop",
                    Action::Reload => "reload",
                };
                ("sudo", vec!["service", "tor", verb])
            }
            ServiceManager::Homebrew => {
                // brew services has no reload; restart builds fresh circuits
                let verb = match action {
                    Action::Start => "start",
                    Action::Stop => "stop",
                    Action::Reload => "restart",
                };
                ("brew", vec!["services", verb, "tor"])
            }
        }
    }
}

/// Controls tor through the host's service manager.
#[derive(Debug, Clone)]
pub struct SystemServiceController {
    manager: ServiceManager,
    /// Deadline for each service manager invocation.
    command_timeout: Duration,
}

impl SystemServiceController {
    pub fn new(manager: ServiceManager, command_timeout: Duration) -> Self {
        Self {
            manager,
            command_timeout,
        }
    }

    async fn run(&self, action: Action) -> Result<(), ServiceError> {
        let (program, args) = self.manager.command(action);
        run_command(program, &args, self.command_timeout).await
    }
}

#[async_trait]
impl ServiceController for SystemServiceController {
    fn name(&self) -> &'static str {
        match self.manager {
            ServiceManager::Systemd => "systemd",
            ServiceManager::SysV => "service",
            ServiceManager::Homebrew => "homebrew",
        }
    }

    async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting Tor service...");
        self.run(Action::Start).await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        info!("Stopping all Tor-related processes...");
        self.run(Action::Stop).await
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        info!("Reloading Tor to request new identity...");
        self.run(Action::Reload).await
    }

    async fn is_running(&self) -> bool {
        tor_process_running().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemd_commands() {
        let (program, args) = ServiceManager::Systemd.command(Action::Reload);
        assert_eq!(program, "sudo");
        assert_eq!(args, ["systemctl", "reload", "tor"]);
    }

    #[test]
    fn test_sysv_commands() {
        let (_, args) = ServiceManager::SysV.command(Action::Start);
        assert_eq!(args, ["service", "tor", "start"]);
    }

    #[test]
    fn test_homebrew_reload_restarts() {
        let (program, args) = ServiceManager::Homebrew.command(Action::Reload);
        assert_eq!(program, "brew");
        assert_eq!(args, ["services", "restart", "tor"]);
    }
}
