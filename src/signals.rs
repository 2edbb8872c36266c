use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Stop accepting connections, then drain the request detail buffer
    Graceful,
}

/// Setup signal handlers for the server
///
/// Returns a broadcast sender for shutdown signals and a join handle for the
/// signal task. SIGTERM and SIGINT both trigger a graceful shutdown.
#[cfg(unix)]
pub fn setup_signal_handlers() -> Result<(
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
)> {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown");
            }
        }
        let _ = tx_clone.send(ShutdownSignal::Graceful);
    });

    Ok((shutdown_tx, handle))
}

/// Non-unix platforms only get Ctrl+C
#[cfg(not(unix))]
pub fn setup_signal_handlers() -> Result<(
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
)> {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, initiating shutdown");
                let _ = tx_clone.send(ShutdownSignal::Graceful);
            }
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });

    Ok((shutdown_tx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_broadcast_reaches_subscribers() {
        let (tx, handle) = setup_signal_handlers().unwrap();
        let mut rx_a = tx.subscribe();
        let mut rx_b = tx.subscribe();

        // Manual trigger, same path the server uses for its own shutdown
        tx.send(ShutdownSignal::Graceful).unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert_eq!(rx_b.recv().await.unwrap(), ShutdownSignal::Graceful);

        handle.abort();
    }
}
