//! Drain loop for converging the agent's state with the event ledger.
//!
//! The drain loop:
//! - Ticks on a fixed interval and asks the ledger for an event pending drain
//! - Takes the agent offline when there is one
//! - Marks every tracked event drained so later ticks do no more work
//!
//! Failing to take the agent offline is fatal. A doomed node that keeps
//! accepting builds has no local way to recover.

use std::sync::Arc;
use std::time::Duration;

use spotwatch_interruption::LedgerHandle;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::agent::AgentControl;
use crate::config::DRAIN_INTERVAL;
use crate::error::DrainError;

/// Drain loop configuration.
pub struct DrainConfig {
    /// Interval between ledger checks.
    pub interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: DRAIN_INTERVAL,
        }
    }
}

/// Where the node is in the drain cycle, as last observed by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    /// No tracked events; the agent takes builds.
    Serving,
    /// An event is pending drain; the agent is being taken offline.
    DrainRequested,
    /// The agent is offline and every tracked event is drained.
    Drained,
}

/// Drives the agent offline while the ledger has events pending drain.
pub struct DrainOrchestrator {
    ledger: LedgerHandle,
    agent: Arc<dyn AgentControl>,
    config: DrainConfig,
    phase: DrainPhase,
}

impl DrainOrchestrator {
    pub fn new(ledger: LedgerHandle, agent: Arc<dyn AgentControl>, config: DrainConfig) -> Self {
        Self {
            ledger,
            agent,
            config,
            phase: DrainPhase::Serving,
        }
    }

    pub fn phase(&self) -> DrainPhase {
        self.phase
    }

    /// Run until shutdown, or until taking the agent offline fails.
    ///
    /// Shutdown is checked before every tick, so no tick starts after it has
    /// been signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DrainError> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            agent = %self.agent.agent_name(),
            "Starting drain loop"
        );

        let mut timer = tokio::time::interval(self.config.interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Drain loop failed");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(phase = ?self.phase, "Drain loop shutting down");
        Ok(())
    }

    /// Perform a single drain pass.
    pub async fn tick(&mut self) -> Result<DrainPhase, DrainError> {
        let Some(event) = self.ledger.active_event().await? else {
            if self.phase != DrainPhase::Serving && self.ledger.should_uncordon().await? {
                debug!("No tracked events left, agent back in service");
                self.phase = DrainPhase::Serving;
            }
            return Ok(self.phase);
        };

        self.phase = DrainPhase::DrainRequested;
        info!(
            agent = %self.agent.agent_name(),
            event_id = %event.event_id,
            kind = %event.kind,
            start_time = %event.start_time,
            description = %event.description,
            "Interruption event is due, taking agent offline"
        );

        self.agent
            .mark_offline()
            .await
            .map_err(|source| DrainError::MarkOffline {
                agent: self.agent.agent_name().to_string(),
                source,
            })?;

        let drained = self.ledger.mark_all_drained().await?;
        self.phase = DrainPhase::Drained;
        info!(
            agent = %self.agent.agent_name(),
            drained,
            "Agent successfully marked offline"
        );

        Ok(self.phase)
    }
}
