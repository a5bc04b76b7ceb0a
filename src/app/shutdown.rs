use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `token` on SIGINT or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = wait_for_signal() => {
                info!("Shutdown signal received");
                token.cancel();
            }
        }
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
