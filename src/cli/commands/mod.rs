//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod fix;
mod ip;
mod rotate;
mod stop;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::config::{IntervalSpec, RotationConfig, Settings, ToolInfo};
use crate::identity::{HttpAddressLookup, IdentityResolver};
use crate::service::{is_tor_installed, Platform};

#[derive(Parser)]
#[command(name = "tornet")]
#[command(about = "Automate IP address changes using Tor")]
#[command(version)]
pub struct Cli {
    /// Time in seconds between IP changes, or a range such as 60-120
    #[arg(long, env = "TORNET_INTERVAL", default_value = "60")]
    interval: IntervalSpec,

    /// Number of times to change the IP. If 0, change IP indefinitely
    #[arg(long, env = "TORNET_COUNT", default_value = "10")]
    count: u32,

    /// Display the current IP address and exit
    #[arg(long)]
    ip: bool,

    /// Automatically fix issues (install Tor, upgrade tornet)
    #[arg(long)]
    auto_fix: bool,

    /// Stop all Tor services and tornet processes and exit
    #[arg(long)]
    stop: bool,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Build the identity resolver from settings.
fn build_resolver(settings: &Settings, tool: &ToolInfo) -> anyhow::Result<IdentityResolver> {
    let lookup = HttpAddressLookup::new(settings, tool)
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
    Ok(IdentityResolver::new(Arc::new(lookup), settings.settle_delay()))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let tool = ToolInfo::current();
    let settings = Settings::load(cli.config.as_deref()).await?;
    let platform = Platform::detect();

    if cli.ip {
        return ip::cmd_show_ip(&settings, &tool).await;
    }

    if !is_tor_installed(&settings, platform).await {
        // --auto-fix is the way out of a missing install
        if !cli.auto_fix {
            anyhow::bail!("Tor is not installed. Install Tor or run with --auto-fix and try again.");
        }
    }

    if cli.auto_fix {
        return fix::cmd_auto_fix(&settings, platform, &tool).await;
    }

    if cli.stop {
        return stop::cmd_stop(&settings, &tool).await;
    }

    let rotation = RotationConfig::new(cli.interval, cli.count);
    rotate::cmd_rotate(&settings, rotation, &tool).await
}
