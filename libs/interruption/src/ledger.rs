//! In-memory ledger of interruption events for this node.
//!
//! The ledger answers two questions for the drain loop and the cancellation
//! consumer:
//! - Is there an event that still needs the node drained? (`has_active`)
//! - Is it safe to put the node back into service? (`should_uncordon`)
//!
//! # Invariants
//!
//! - Events are keyed by `event_id`; re-adding a tracked event is a no-op
//! - Drained events stay tracked until cancelled, so they keep blocking uncordon
//! - `should_uncordon` is true iff no events are tracked

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::event::{EventId, InterruptionEvent};

/// Default lead time before an event's start at which draining begins.
pub const DEFAULT_GRACE_PERIOD_SECS: u32 = 300;

#[derive(Debug, Clone)]
struct TrackedEvent {
    event: InterruptionEvent,
    drained: bool,
}

/// Ledger of tracked interruption events.
#[derive(Debug, Clone)]
pub struct EventLedger {
    events: HashMap<EventId, TrackedEvent>,

    /// How long before `start_time` an event becomes pending drain.
    grace_period: Duration,
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new(Duration::seconds(i64::from(DEFAULT_GRACE_PERIOD_SECS)))
    }
}

impl EventLedger {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            events: HashMap::new(),
            grace_period,
        }
    }

    /// Track an event. Returns `true` if the event was not tracked before.
    pub fn add(&mut self, event: InterruptionEvent) -> bool {
        if self.events.contains_key(&event.event_id) {
            return false;
        }
        self.events.insert(
            event.event_id.clone(),
            TrackedEvent {
                event,
                drained: false,
            },
        );
        true
    }

    /// Stop tracking an event. Returns `true` if it was tracked.
    pub fn cancel(&mut self, event_id: &EventId) -> bool {
        self.events.remove(event_id).is_some()
    }

    /// The first event that still requires the node to be drained at `now`.
    pub fn active_event(&self, now: DateTime<Utc>) -> Option<&InterruptionEvent> {
        self.events
            .values()
            .filter(|tracked| !tracked.drained && self.drain_time(&tracked.event) <= now)
            .map(|tracked| &tracked.event)
            .min_by_key(|event| event.start_time)
    }

    pub fn has_active(&self, now: DateTime<Utc>) -> bool {
        self.active_event(now).is_some()
    }

    pub fn should_uncordon(&self) -> bool {
        self.events.is_empty()
    }

    /// Mark every tracked event as drained. Returns how many changed.
    pub fn mark_all_drained(&mut self) -> usize {
        let mut changed = 0;
        for tracked in self.events.values_mut().filter(|t| !t.drained) {
            tracked.drained = true;
            changed += 1;
        }
        changed
    }

    pub fn is_tracked(&self, event_id: &EventId) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.events.len()
    }

    /// Time remaining until draining should start for `event`; negative once due.
    pub fn time_until_drain(&self, event: &InterruptionEvent, now: DateTime<Utc>) -> Duration {
        self.drain_time(event) - now
    }

    fn drain_time(&self, event: &InterruptionEvent) -> DateTime<Utc> {
        event.start_time - self.grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn spot(id: &str, start: DateTime<Utc>) -> InterruptionEvent {
        InterruptionEvent::new(id, EventKind::SpotInterruption, start)
    }

    fn maintenance(id: &str, start: DateTime<Utc>) -> InterruptionEvent {
        InterruptionEvent::new(id, EventKind::ScheduledMaintenance, start)
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = EventLedger::default();
        assert!(!ledger.has_active(Utc::now()));
        assert!(ledger.should_uncordon());
        assert_eq!(ledger.tracked_count(), 0);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut ledger = EventLedger::default();
        let now = Utc::now();

        assert!(ledger.add(spot("e1", now)));
        assert!(!ledger.add(spot("e1", now)));
        assert_eq!(ledger.tracked_count(), 1);
    }

    #[test]
    fn test_readd_does_not_reset_drained() {
        let mut ledger = EventLedger::default();
        let now = Utc::now();

        ledger.add(spot("e1", now));
        assert!(ledger.has_active(now));
        assert_eq!(ledger.mark_all_drained(), 1);
        assert!(!ledger.has_active(now));

        // Detectors keep reporting the same notice on every poll.
        ledger.add(spot("e1", now));
        assert!(!ledger.has_active(now));
    }

    #[test]
    fn test_event_outside_grace_period_is_not_active() {
        let mut ledger = EventLedger::new(Duration::seconds(300));
        let now = Utc::now();

        ledger.add(maintenance("e1", now + Duration::hours(2)));
        assert!(!ledger.has_active(now));
        assert!(!ledger.should_uncordon());

        // Becomes due once inside the grace period.
        assert!(ledger.has_active(now + Duration::hours(2) - Duration::seconds(299)));
    }

    #[test]
    fn test_time_until_drain() {
        let ledger = EventLedger::new(Duration::seconds(60));
        let now = Utc::now();
        let event = spot("e1", now + Duration::seconds(100));

        assert_eq!(ledger.time_until_drain(&event, now), Duration::seconds(40));
    }

    #[test]
    fn test_drained_event_blocks_uncordon_until_cancelled() {
        let mut ledger = EventLedger::default();
        let now = Utc::now();

        ledger.add(spot("e1", now));
        ledger.add(maintenance("e2", now));
        ledger.mark_all_drained();

        assert!(ledger.cancel(&EventId::from("e1")));
        assert!(!ledger.should_uncordon());

        assert!(ledger.cancel(&EventId::from("e2")));
        assert!(ledger.should_uncordon());
    }

    #[test]
    fn test_cancel_unknown_event() {
        let mut ledger = EventLedger::default();
        assert!(!ledger.cancel(&EventId::from("missing")));
        assert!(ledger.should_uncordon());
    }

    #[test]
    fn test_active_event_prefers_earliest_start() {
        let mut ledger = EventLedger::default();
        let now = Utc::now();

        ledger.add(maintenance("late", now - Duration::seconds(10)));
        ledger.add(spot("early", now - Duration::seconds(60)));

        let active = ledger.active_event(now).unwrap();
        assert_eq!(active.event_id.as_str(), "early");
    }

    #[test]
    fn test_new_event_after_drain_is_active() {
        let mut ledger = EventLedger::default();
        let now = Utc::now();

        ledger.add(spot("e1", now));
        ledger.mark_all_drained();
        assert!(ledger.add(maintenance("e2", now)));

        let active = ledger.active_event(now).unwrap();
        assert_eq!(active.event_id.as_str(), "e2");
        assert!(ledger.is_tracked(&EventId::from("e1")));
    }
}
