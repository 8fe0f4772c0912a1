//! Termination handling shared by both services.
//!
//! Kubernetes stops pods with SIGTERM; interactive runs stop with
//! SIGINT. Either resolves the shutdown future, and the servers then
//! drain through their cancellation tokens.

use tokio_util::sync::CancellationToken;

/// Resolve once a termination signal arrives.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        let received = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        tracing::warn!(signal = received, "termination signal received, shutting down");
    }

    #[cfg(not(unix))]
    {
        // Only Ctrl+C is available off Unix.
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        tracing::warn!("Ctrl+C received, shutting down");
    }
}

/// Cancel the token once a termination signal arrives. Spawned at
/// startup by each service binary.
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
}
