//! Event ingestion pipeline.
//!
//! ```text
//! SpotDetector        ─┐                       ┌─> interruption consumer ─> ledger.add
//!                      ├─> interruption chan ──┘
//! MaintenanceDetector ─┤
//!                      └─> cancellation chan ───> cancellation consumer ─> ledger.cancel
//!                                                                        └─> agent.mark_online
//! ```
//!
//! Each channel has exactly one consumer, so events on a channel are applied
//! in arrival order. Nothing orders the two channels against each other; the
//! ledger is keyed by event id, so that is fine.

use std::sync::Arc;
use std::time::Duration;

use spotwatch_interruption::{EventKind, InterruptionEvent, LedgerHandle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::agent::AgentControl;
use crate::detector::Detector;

/// Signal channel capacity. One slot is the closest tokio has to a hand-off.
const SIGNAL_CHANNEL_CAPACITY: usize = 1;

/// The detectors, one per event kind.
pub struct Detectors {
    pub spot: Arc<dyn Detector>,
    pub maintenance: Arc<dyn Detector>,
}

/// Sending side of the two signal channels.
#[derive(Clone)]
pub struct SignalSenders {
    pub interruptions: mpsc::Sender<InterruptionEvent>,
    pub cancellations: mpsc::Sender<InterruptionEvent>,
}

/// Receiving side of the two signal channels.
pub struct SignalReceivers {
    pub interruptions: mpsc::Receiver<InterruptionEvent>,
    pub cancellations: mpsc::Receiver<InterruptionEvent>,
}

/// Create the interruption and cancellation channels.
pub fn signal_channels() -> (SignalSenders, SignalReceivers) {
    let (interruption_tx, interruption_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let (cancel_tx, cancel_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    (
        SignalSenders {
            interruptions: interruption_tx,
            cancellations: cancel_tx,
        },
        SignalReceivers {
            interruptions: interruption_rx,
            cancellations: cancel_rx,
        },
    )
}

// =============================================================================
// Producers
// =============================================================================

/// Poll a detector every `interval` until shutdown, forwarding what it finds.
///
/// Detector errors are logged and the next poll goes ahead as usual.
pub async fn run_producer(
    detector: Arc<dyn Detector>,
    senders: SignalSenders,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = detector.kind();
    info!(kind = %kind, interval_ms = interval.as_millis() as u64, "Started monitoring for events");

    let mut timer = tokio::time::interval(interval);
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {
                match detector.poll().await {
                    Ok(outcome) => {
                        if !forward(&senders, outcome.interruptions, outcome.cancellations).await {
                            info!(kind = %kind, "Signal channel closed, stopping detector");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "There was a problem monitoring for events");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(kind = %kind, "Detector shutting down");
}

/// Returns `false` once either channel is closed.
async fn forward(
    senders: &SignalSenders,
    interruptions: Vec<InterruptionEvent>,
    cancellations: Vec<InterruptionEvent>,
) -> bool {
    for event in interruptions {
        if senders.interruptions.send(event).await.is_err() {
            return false;
        }
    }
    for event in cancellations {
        if senders.cancellations.send(event).await.is_err() {
            return false;
        }
    }
    true
}

// =============================================================================
// Consumers
// =============================================================================

/// Add every received interruption to the ledger until the channel closes.
pub async fn run_interruption_consumer(
    mut interruptions: mpsc::Receiver<InterruptionEvent>,
    ledger: LedgerHandle,
) {
    info!("Started watching for interruption events");

    while let Some(event) = interruptions.recv().await {
        let event_id = event.event_id.clone();
        let kind = event.kind;
        match ledger.add(event).await {
            Ok(true) => info!(event_id = %event_id, kind = %kind, "Got interruption event"),
            Ok(false) => debug!(event_id = %event_id, "Interruption event already tracked"),
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to record interruption event");
                return;
            }
        }
    }

    debug!("Interruption channel closed");
}

/// Apply every received cancellation and uncordon once nothing is tracked.
///
/// Every cancellation is followed by an uncordon check, including ones for
/// events that are no longer tracked. A failed uncordon is logged and not
/// retried here; the next cancellation tries again.
pub async fn run_cancellation_consumer(
    mut cancellations: mpsc::Receiver<InterruptionEvent>,
    ledger: LedgerHandle,
    agent: Arc<dyn AgentControl>,
) {
    info!("Started watching for event cancellations");

    while let Some(event) = cancellations.recv().await {
        let event_id = event.event_id.clone();
        match ledger.cancel(event_id.clone()).await {
            Ok(true) => info!(event_id = %event_id, kind = %event.kind, "Got cancel event"),
            // Withdrawn notices keep showing up on every poll.
            Ok(false) => debug!(event_id = %event_id, "Cancelled event was not tracked"),
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to record cancellation");
                return;
            }
        }

        match ledger.should_uncordon().await {
            Ok(true) => {
                info!(
                    agent = %agent.agent_name(),
                    event_id = %event_id,
                    "Marking agent online due to a cancellation event"
                );
                if let Err(e) = agent.mark_online().await {
                    error!(
                        agent = %agent.agent_name(),
                        event_id = %event_id,
                        error = %e,
                        "Marking agent online failed"
                    );
                }
            }
            Ok(false) => {
                info!(
                    event_id = %event_id,
                    "Another interruption event is active, not marking agent online"
                );
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to query ledger");
                return;
            }
        }
    }

    debug!("Cancellation channel closed");
}

// =============================================================================
// Pipeline
// =============================================================================

/// Handles of the spawned pipeline tasks.
pub struct IngestTasks {
    producers: Vec<(EventKind, JoinHandle<()>)>,
    consumers: Vec<(&'static str, JoinHandle<()>)>,
}

/// Spawn both producers and both consumers.
pub fn spawn_pipeline(
    detectors: Detectors,
    ledger: LedgerHandle,
    agent: Arc<dyn AgentControl>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> IngestTasks {
    let (senders, receivers) = signal_channels();

    let producers = [detectors.spot, detectors.maintenance]
        .into_iter()
        .map(|detector| {
            let kind = detector.kind();
            let span = info_span!("detector", kind = %kind);
            let task = tokio::spawn(
                run_producer(detector, senders.clone(), poll_interval, shutdown.clone())
                    .instrument(span),
            );
            (kind, task)
        })
        .collect();
    // Producers hold the only senders, so channels close once both have stopped.
    drop(senders);

    let interruption_consumer = tokio::spawn(
        run_interruption_consumer(receivers.interruptions, ledger.clone())
            .instrument(info_span!("interruption_consumer")),
    );
    let cancellation_consumer = tokio::spawn(
        run_cancellation_consumer(receivers.cancellations, ledger, agent)
            .instrument(info_span!("cancellation_consumer")),
    );

    IngestTasks {
        producers,
        consumers: vec![
            ("interruption", interruption_consumer),
            ("cancellation", cancellation_consumer),
        ],
    }
}

impl IngestTasks {
    /// Wait for producers to stop, then give consumers `grace` to drain.
    ///
    /// Call after shutdown has been signalled.
    pub async fn join(self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;

        for (kind, task) in self.producers {
            wait(task, deadline, &kind.to_string()).await;
        }
        for (name, task) in self.consumers {
            wait(task, deadline, name).await;
        }
    }
}

async fn wait(mut task: JoinHandle<()>, deadline: tokio::time::Instant, name: &str) {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => debug!(task = name, "Task stopped"),
        Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
        Err(_) => {
            warn!(task = name, "Task did not stop in time, aborting");
            task.abort();
        }
    }
}
