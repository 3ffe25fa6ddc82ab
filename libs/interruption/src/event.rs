//! Interruption event definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a single detected reclamation notice.
///
/// Opaque to the ledger. Detectors derive it from the notice itself so that the
/// same notice reported on every poll maps to the same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kind of reclamation notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Spot instance interruption notice.
    SpotInterruption,
    /// Scheduled maintenance event (reboot, retirement, ...).
    ScheduledMaintenance,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::SpotInterruption => write!(f, "spot_interruption"),
            EventKind::ScheduledMaintenance => write!(f, "scheduled_maintenance"),
        }
    }
}

/// A detected reclamation notice for this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptionEvent {
    pub event_id: EventId,
    pub kind: EventKind,

    /// When the reclamation takes effect.
    pub start_time: DateTime<Utc>,

    /// End of the maintenance window, if the notice has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub description: String,
}

impl InterruptionEvent {
    pub fn new(event_id: impl Into<EventId>, kind: EventKind, start_time: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
            start_time,
            end_time: None,
            description: String::new(),
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
