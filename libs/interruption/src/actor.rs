//! Ledger actor - exclusive owner of the event ledger.
//!
//! The actor processes one request at a time, so each ledger operation is
//! atomic with respect to every other caller. Handles are cheap to clone and
//! the actor stops once the last handle is dropped.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::event::{EventId, InterruptionEvent};
use crate::ledger::EventLedger;

/// Default mailbox size for the ledger actor.
const MAILBOX_SIZE: usize = 64;

// =============================================================================
// Messages
// =============================================================================

/// Requests handled by [`LedgerActor`].
#[derive(Debug)]
pub enum LedgerMessage {
    Add {
        event: InterruptionEvent,
        reply_to: oneshot::Sender<bool>,
    },
    Cancel {
        event_id: EventId,
        reply_to: oneshot::Sender<bool>,
    },
    ActiveEvent {
        now: DateTime<Utc>,
        reply_to: oneshot::Sender<Option<InterruptionEvent>>,
    },
    ShouldUncordon {
        reply_to: oneshot::Sender<bool>,
    },
    MarkAllDrained {
        reply_to: oneshot::Sender<usize>,
    },
}

// =============================================================================
// Actor
// =============================================================================

/// Task that owns an [`EventLedger`] and serves [`LedgerMessage`]s.
pub struct LedgerActor {
    ledger: EventLedger,
    rx: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Spawn the actor on the current runtime.
    pub fn spawn(ledger: EventLedger) -> (LedgerHandle, JoinHandle<EventLedger>) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let actor = Self { ledger, rx };
        let task = tokio::spawn(actor.run());
        (LedgerHandle { tx }, task)
    }

    /// Serve requests until every handle is dropped, then hand the ledger back.
    async fn run(mut self) -> EventLedger {
        debug!("Event ledger started");
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg);
        }
        debug!(
            tracked = self.ledger.tracked_count(),
            "Event ledger stopped"
        );
        self.ledger
    }

    fn handle(&mut self, msg: LedgerMessage) {
        // A dropped reply receiver only means the caller gave up waiting.
        match msg {
            LedgerMessage::Add { event, reply_to } => {
                let event_id = event.event_id.clone();
                let kind = event.kind;
                let start_time = event.start_time;
                let added = self.ledger.add(event);
                if added {
                    info!(
                        event_id = %event_id,
                        kind = %kind,
                        start_time = %start_time,
                        "Tracking interruption event"
                    );
                }
                let _ = reply_to.send(added);
            }
            LedgerMessage::Cancel { event_id, reply_to } => {
                let removed = self.ledger.cancel(&event_id);
                if removed {
                    info!(
                        event_id = %event_id,
                        remaining = self.ledger.tracked_count(),
                        "Interruption event cancelled"
                    );
                }
                let _ = reply_to.send(removed);
            }
            LedgerMessage::ActiveEvent { now, reply_to } => {
                let _ = reply_to.send(self.ledger.active_event(now).cloned());
            }
            LedgerMessage::ShouldUncordon { reply_to } => {
                let _ = reply_to.send(self.ledger.should_uncordon());
            }
            LedgerMessage::MarkAllDrained { reply_to } => {
                let _ = reply_to.send(self.ledger.mark_all_drained());
            }
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to the ledger actor.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Track an event. Returns `true` if it was not tracked before.
    pub async fn add(&self, event: InterruptionEvent) -> Result<bool, LedgerError> {
        self.request(|reply_to| LedgerMessage::Add { event, reply_to })
            .await
    }

    /// Stop tracking an event. Returns `true` if it was tracked.
    pub async fn cancel(&self, event_id: EventId) -> Result<bool, LedgerError> {
        self.request(|reply_to| LedgerMessage::Cancel { event_id, reply_to })
            .await
    }

    /// The event that currently requires a drain, if any.
    pub async fn active_event(&self) -> Result<Option<InterruptionEvent>, LedgerError> {
        self.active_event_at(Utc::now()).await
    }

    pub async fn active_event_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<InterruptionEvent>, LedgerError> {
        self.request(|reply_to| LedgerMessage::ActiveEvent { now, reply_to })
            .await
    }

    pub async fn has_active(&self) -> Result<bool, LedgerError> {
        Ok(self.active_event().await?.is_some())
    }

    /// True iff no events are tracked.
    pub async fn should_uncordon(&self) -> Result<bool, LedgerError> {
        self.request(|reply_to| LedgerMessage::ShouldUncordon { reply_to })
            .await
    }

    /// Mark every tracked event as drained. Returns how many changed.
    pub async fn mark_all_drained(&self) -> Result<usize, LedgerError> {
        self.request(|reply_to| LedgerMessage::MarkAllDrained { reply_to })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T, LedgerError> {
        let (reply_to, reply) = oneshot::channel();
        self.tx
            .send(build(reply_to))
            .await
            .map_err(|_| LedgerError::Closed)?;
        reply.await.map_err(|_| LedgerError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (ledger, task) = LedgerActor::spawn(EventLedger::default());
        let now = Utc::now();

        assert!(ledger
            .add(InterruptionEvent::new("e1", EventKind::SpotInterruption, now))
            .await
            .unwrap());
        assert!(ledger.has_active().await.unwrap());
        assert!(!ledger.should_uncordon().await.unwrap());

        assert_eq!(ledger.mark_all_drained().await.unwrap(), 1);
        assert!(!ledger.has_active().await.unwrap());

        assert!(ledger.cancel(EventId::from("e1")).await.unwrap());
        assert!(ledger.should_uncordon().await.unwrap());

        drop(ledger);
        let final_state = task.await.unwrap();
        assert_eq!(final_state.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_serialized() {
        let (ledger, _task) = LedgerActor::spawn(EventLedger::default());
        let now = Utc::now();

        let mut joins = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            joins.push(tokio::spawn(async move {
                ledger
                    .add(InterruptionEvent::new(
                        format!("e{}", i % 4),
                        EventKind::ScheduledMaintenance,
                        now,
                    ))
                    .await
                    .unwrap()
            }));
        }

        let mut newly_added = 0;
        for join in joins {
            if join.await.unwrap() {
                newly_added += 1;
            }
        }
        assert_eq!(newly_added, 4);
    }

    #[tokio::test]
    async fn test_closed_ledger() {
        let (ledger, task) = LedgerActor::spawn(EventLedger::default());
        task.abort();
        let _ = task.await;

        assert_eq!(ledger.should_uncordon().await, Err(LedgerError::Closed));
    }
}
