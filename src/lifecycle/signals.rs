//! OS signal handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `cancel` on SIGTERM or SIGINT (Ctrl-C elsewhere).
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                match signal {
                    Ok(name) => info!(signal = name, "received signal, shutting down"),
                    Err(e) => {
                        warn!(error = %e, "signal handler unavailable");
                        return;
                    }
                }
                cancel.cancel();
            }
            () = cancel.cancelled() => {}
        }
    })
}

/// Wait for a listener to finish. A failed task is logged, not propagated.
pub async fn join_signal_listener(listener: JoinHandle<()>) {
    if let Err(e) = listener.await {
        warn!(error = %e, "signal listener task failed");
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = term.recv() => Ok("SIGTERM"),
        _ = int.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
