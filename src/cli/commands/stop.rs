//! `--stop`: stop Tor and any other running tornet processes.

use console::style;
use tracing::error;

use crate::config::{Settings, ToolInfo};
use crate::service::{select_controller, terminate_other_instances};

pub async fn cmd_stop(settings: &Settings, tool: &ToolInfo) -> anyhow::Result<()> {
    let service = select_controller(settings);
    if let Err(e) = service.stop().await {
        error!("Failed to stop Tor: {}", e);
    }

    let terminated = terminate_other_instances(tool.name).await;
    tracing::debug!("Terminated {} other {} process(es)", terminated, tool.name);

    println!(
        " [{}] {}",
        style("+").green(),
        style(format!(
            "Tor services and {} processes stopped.",
            tool.name
        ))
        .green()
    );
    Ok(())
}
