//! `--ip`: show the current address and exit.

use tokio_util::sync::CancellationToken;

use crate::cli::display::print_ip;
use crate::config::{Settings, ToolInfo};
use crate::service::select_controller;

use super::build_resolver;

pub async fn cmd_show_ip(settings: &Settings, tool: &ToolInfo) -> anyhow::Result<()> {
    let service = select_controller(settings);
    let resolver = build_resolver(settings, tool)?;

    // Ctrl-C here needs no cleanup; the default handler exits the process
    let resolution = resolver
        .resolve_current(service.as_ref(), &CancellationToken::new())
        .await?;

    match resolution.address() {
        Some(address) => print_ip(address),
        None => tracing::error!("Could not determine the current IP address."),
    }
    Ok(())
}
