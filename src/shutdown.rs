//! Signal-driven shutdown for the CLI run loop.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Spawn a SIGTERM/SIGINT listener and hand back the token it cancels.
/// The simulation loop polls the token between steps, so an interrupted
/// run still prints its report instead of dying mid-step.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => trigger.cancel(),
            Err(error) => tracing::warn!(%error, "Failed to install signal handlers"),
        }
    });

    token
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, stopping simulation"),
        _ = sigint.recv() => tracing::info!("Received SIGINT, stopping simulation"),
    }
    Ok(())
}
