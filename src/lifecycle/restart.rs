use anyhow::{Context, Result};
use std::process::Command;
use std::time::Duration;
use tracing::info;

/// Command that starts a fresh copy of this binary with the same arguments
fn restart_command() -> Result<Command> {
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    let mut command = Command::new(exe);
    command.args(std::env::args_os().skip(1));
    Ok(command)
}

/// Wait `delay`, then spawn a replacement process. Returns its pid; the
/// caller exits afterwards. World state does not carry over.
pub async fn restart_process(delay: Duration) -> Result<u32> {
    info!(delay_ms = delay.as_millis() as u64, "Restarting host");
    tokio::time::sleep(delay).await;

    let mut command = restart_command()?;
    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn {:?}", command.get_program()))?;

    info!(pid = child.id(), "Replacement process started");
    Ok(child.id())
}
