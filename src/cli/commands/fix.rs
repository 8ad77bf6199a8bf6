//! `--auto-fix`: reinstall dependencies and upgrade tornet.

use console::style;

use crate::config::{Settings, ToolInfo};
use crate::service::{auto_fix, Platform};

pub async fn cmd_auto_fix(
    settings: &Settings,
    platform: Platform,
    tool: &ToolInfo,
) -> anyhow::Result<()> {
    auto_fix(settings, platform, tool).await?;
    println!(" [{}] {}", style("+").green(), style("Auto-fix complete.").green());
    Ok(())
}
