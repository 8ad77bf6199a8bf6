//! Tor installation checks and `--auto-fix` repair.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use super::process::{command_output, run_command};
use super::{Platform, ServiceError};
use crate::config::{Settings, ToolInfo};

/// Deadline for package installs and `cargo install`.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Find the tor binary in PATH or at a configured location.
pub fn find_tor_binary(settings: &Settings) -> Option<PathBuf> {
    // Check explicit path first
    if let Some(ref path) = settings.tor_binary {
        if path.exists() {
            return Some(path.clone());
        }
    }

    let candidates = if cfg!(windows) {
        vec!["tor.exe", "Tor\\tor.exe"]
    } else {
        vec!["tor", "/usr/bin/tor", "/usr/local/bin/tor"]
    };

    candidates
        .into_iter()
        .find_map(|candidate| which::which(candidate).ok())
}

/// Check if tor is installed on this system.
///
/// On macOS tor counts as installed only when Homebrew manages it, since
/// that is how the service is controlled.
pub async fn is_tor_installed(settings: &Settings, platform: Platform) -> bool {
    match platform {
        Platform::MacOs => {
            which::which("brew").is_ok() && command_output("brew", &["list", "tor"]).await.is_some()
        }
        _ => find_tor_binary(settings).is_some(),
    }
}

fn install_command(platform: Platform) -> Option<(&'static str, Vec<&'static str>)> {
    match platform {
        Platform::ArchLinux => Some(("sudo", vec!["pacman", "-S", "--noconfirm", "tor"])),
        Platform::Linux => Some(("sudo", vec!["apt-get", "install", "-y", "tor"])),
        Platform::MacOs => Some(("brew", vec!["install", "tor"])),
        Platform::Windows => None,
    }
}

/// Install tor with the platform package manager.
pub async fn install_tor(platform: Platform) -> Result<(), ServiceError> {
    let Some((program, args)) = install_command(platform) else {
        warn!("Install the Tor Expert Bundle and add tor.exe to PATH");
        return Err(ServiceError::Unsupported("automatic Tor installation"));
    };
    info!("Installing Tor...");
    run_command(program, &args, INSTALL_TIMEOUT).await
}

/// Reinstall dependencies and upgrade this tool.
pub async fn auto_fix(
    settings: &Settings,
    platform: Platform,
    tool: &ToolInfo,
) -> Result<(), ServiceError> {
    if is_tor_installed(settings, platform).await {
        info!("Tor is already installed");
    } else {
        install_tor(platform).await?;
    }

    info!("Upgrading {}...", tool.name);
    run_command("cargo", &["install", "--force", tool.name], INSTALL_TIMEOUT).await
}
