//! Wiring of the ingestion pipeline, ledger, and drain loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use spotwatch_interruption::{EventLedger, LedgerActor};
use tracing::{error, info, info_span, Instrument};

use crate::agent::AgentControl;
use crate::config::POLL_INTERVAL;
use crate::drain::{DrainConfig, DrainOrchestrator};
use crate::error::DrainError;
use crate::ingest::{spawn_pipeline, Detectors};
use crate::shutdown::ShutdownCoordinator;

/// How long consumers get to drain their channels after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The assembled daemon.
pub struct Daemon {
    pub ledger: EventLedger,
    pub agent: Arc<dyn AgentControl>,
    pub detectors: Detectors,
    pub poll_interval: Duration,
    pub drain: DrainConfig,
    pub shutdown_grace: Duration,
}

impl Daemon {
    pub fn new(ledger: EventLedger, agent: Arc<dyn AgentControl>, detectors: Detectors) -> Self {
        Self {
            ledger,
            agent,
            detectors,
            poll_interval: POLL_INTERVAL,
            drain: DrainConfig::default(),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Run until `shutdown_signal` completes or the drain loop fails.
    ///
    /// A drain loop failure is returned as soon as it happens, without waiting
    /// for the other tasks.
    pub async fn run<F>(self, shutdown_signal: F) -> Result<(), DrainError>
    where
        F: Future<Output = ()>,
    {
        let shutdown = ShutdownCoordinator::new();
        let (ledger, ledger_task) = LedgerActor::spawn(self.ledger);

        let ingest = spawn_pipeline(
            self.detectors,
            ledger.clone(),
            Arc::clone(&self.agent),
            self.poll_interval,
            shutdown.subscribe(),
        );

        let orchestrator = DrainOrchestrator::new(ledger, self.agent, self.drain);
        let mut drain_task = tokio::spawn(
            orchestrator
                .run(shutdown.subscribe())
                .instrument(info_span!("drain")),
        );

        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutting down");
            }
            result = &mut drain_task => {
                return match result {
                    Ok(Err(e)) => Err(e),
                    Ok(Ok(())) => {
                        info!("Drain loop exited");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "Drain task panicked");
                        Err(DrainError::from(e))
                    }
                };
            }
        }

        shutdown.trigger();

        // A tick already in flight still finishes, and may still fail.
        match drain_task.await {
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
            Err(e) => {
                error!(error = %e, "Drain task panicked");
                return Err(DrainError::from(e));
            }
        }

        ingest.join(self.shutdown_grace).await;

        // Consumers held the last ledger handles.
        match tokio::time::timeout(self.shutdown_grace, ledger_task).await {
            Ok(Ok(ledger)) => info!(
                tracked = ledger.tracked_count(),
                "Event ledger closed"
            ),
            Ok(Err(e)) => error!(error = %e, "Event ledger task panicked"),
            Err(_) => error!("Event ledger did not close in time"),
        }

        Ok(())
    }
}
