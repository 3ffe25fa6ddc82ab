//! Shutdown coordination.
//!
//! Shutdown is published on a `watch` channel. Long-running loops check it
//! before each iteration and also select on it while waiting for their timers.

use tokio::sync::watch;
use tracing::info;

/// Owner of the shutdown signal.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A receiver that observes the shutdown signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Signal shutdown to every subscriber. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Wait for SIGTERM or Ctrl-C. Returns the name of the signal received.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let received = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            result = tokio::signal::ctrl_c() => {
                result?;
                "SIGINT"
            }
        };
        info!(signal = received, "Received shutdown signal");
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!(signal = "ctrl_c", "Received shutdown signal");
        Ok("ctrl_c")
    }
}
