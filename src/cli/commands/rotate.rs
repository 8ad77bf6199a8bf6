//! Default command: initialize Tor and rotate the exit address on a schedule.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::display::{
    print_banner, print_ip, print_start_message, print_terminated, ConsoleReporter,
};
use crate::config::{RotationConfig, Settings, ToolInfo};
use crate::lifecycle::{Cancelled, LifecycleSupervisor};
use crate::probe::ReachabilityProbe;
use crate::rotation::{initialize, RotationController, RotationState, RotationSummary};
use crate::service::select_controller;

use super::build_resolver;

pub async fn cmd_rotate(
    settings: &Settings,
    rotation: RotationConfig,
    tool: &ToolInfo,
) -> anyhow::Result<()> {
    let service = select_controller(settings);
    let cancel = CancellationToken::new();
    let supervisor = LifecycleSupervisor::new(service.clone(), cancel.clone())
        .with_stop_timeout(settings.command_timeout());
    supervisor.install_handlers()?;

    print_banner(tool);

    let resolver = build_resolver(settings, tool)?;
    let probe = ReachabilityProbe::from_settings(settings);
    let mut controller = RotationController::new(
        rotation,
        service.clone(),
        resolver.clone(),
        Arc::new(ConsoleReporter),
    )
    .with_reload_timeout(settings.reload_timeout());

    info!(
        "Rotating every {}s ({})",
        rotation.interval,
        if rotation.is_unbounded() {
            "until stopped".to_string()
        } else {
            format!("{} times", rotation.count)
        }
    );

    let settings = settings.clone();
    let summary = supervisor
        .supervise(async move {
            let resolution =
                initialize(&settings, service.as_ref(), &probe, &resolver, &cancel).await?;
            print_start_message();
            if let Some(address) = resolution.address() {
                print_ip(address);
            }
            Ok::<RotationSummary, Cancelled>(controller.run(&cancel).await)
        })
        .await?;

    match summary {
        Ok(RotationSummary {
            final_state: RotationState::Done,
            cycles,
            reported,
        }) => {
            info!(
                "Finished {} rotation(s), {} with a confirmed address",
                cycles, reported
            );
        }
        Ok(_) | Err(Cancelled) => print_terminated(),
    }
    Ok(())
}
