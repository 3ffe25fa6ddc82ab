//! Interruption detectors.
//!
//! One detector per [`EventKind`]:
//! - [`SpotDetector`] reads the spot instance-action notice
//! - [`MaintenanceDetector`] reads the scheduled maintenance event list
//!
//! Detectors only classify what the metadata service reports. Whether to drain
//! is decided by the ledger and the drain loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use spotwatch_interruption::{EventKind, InterruptionEvent};

use crate::error::DetectorError;
use crate::metadata::{MetadataClient, SCHEDULED_EVENTS_PATH, SPOT_ACTION_PATH};

/// Time format of scheduled maintenance events, e.g. `21 Jan 2019 09:00:43 GMT`.
const SCHEDULED_TIME_FORMAT: &str = "%d %b %Y %H:%M:%S GMT";

const STATE_CANCELED: &str = "canceled";
const STATE_COMPLETED: &str = "completed";

/// Result of a single detector poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorOutcome {
    pub interruptions: Vec<InterruptionEvent>,
    pub cancellations: Vec<InterruptionEvent>,
}

impl DetectorOutcome {
    pub fn is_empty(&self) -> bool {
        self.interruptions.is_empty() && self.cancellations.is_empty()
    }
}

/// Detector interface.
#[async_trait]
pub trait Detector: Send + Sync {
    fn kind(&self) -> EventKind;

    async fn poll(&self) -> Result<DetectorOutcome, DetectorError>;
}

// =============================================================================
// Spot interruption
// =============================================================================

#[derive(Debug, Deserialize)]
struct SpotAction {
    action: String,
    time: DateTime<Utc>,
}

/// Detects spot interruption notices.
pub struct SpotDetector {
    metadata: Arc<MetadataClient>,
}

impl SpotDetector {
    pub fn new(metadata: Arc<MetadataClient>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl Detector for SpotDetector {
    fn kind(&self) -> EventKind {
        EventKind::SpotInterruption
    }

    async fn poll(&self) -> Result<DetectorOutcome, DetectorError> {
        let Some(body) = self.metadata.get(SPOT_ACTION_PATH).await? else {
            return Ok(DetectorOutcome::default());
        };

        Ok(DetectorOutcome {
            interruptions: vec![parse_spot_action(&body)?],
            cancellations: Vec::new(),
        })
    }
}

/// Parse a spot instance-action notice into an event.
///
/// The id is derived from the raw notice so repeated polls map to one event.
pub fn parse_spot_action(body: &str) -> Result<InterruptionEvent, DetectorError> {
    let action: SpotAction = serde_json::from_str(body).map_err(|e| DetectorError::Parse {
        what: "spot instance action",
        message: e.to_string(),
    })?;

    let digest = Sha256::digest(body.as_bytes());
    let event_id = format!("spot-itn-{}", hex::encode(digest));

    Ok(
        InterruptionEvent::new(event_id, EventKind::SpotInterruption, action.time).with_description(
            format!(
                "Spot ITN received. Instance will be {} at {}",
                action.action,
                action.time.to_rfc3339()
            ),
        ),
    )
}

// =============================================================================
// Scheduled maintenance
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduledEvent {
    code: String,
    #[serde(default)]
    description: String,
    event_id: String,
    not_before: String,
    #[serde(default)]
    not_after: Option<String>,
    state: String,
}

/// Detects scheduled maintenance events and their withdrawal.
pub struct MaintenanceDetector {
    metadata: Arc<MetadataClient>,
}

impl MaintenanceDetector {
    pub fn new(metadata: Arc<MetadataClient>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl Detector for MaintenanceDetector {
    fn kind(&self) -> EventKind {
        EventKind::ScheduledMaintenance
    }

    async fn poll(&self) -> Result<DetectorOutcome, DetectorError> {
        match self.metadata.get(SCHEDULED_EVENTS_PATH).await? {
            Some(body) => parse_scheduled_events(&body),
            None => Ok(DetectorOutcome::default()),
        }
    }
}

/// Parse the scheduled maintenance event list.
///
/// Canceled and completed events are reported as cancellations, everything
/// else as an interruption.
pub fn parse_scheduled_events(body: &str) -> Result<DetectorOutcome, DetectorError> {
    let events: Vec<ScheduledEvent> =
        serde_json::from_str(body).map_err(|e| DetectorError::Parse {
            what: "scheduled events",
            message: e.to_string(),
        })?;

    let mut outcome = DetectorOutcome::default();
    for scheduled in events {
        let start_time = parse_scheduled_time(&scheduled.not_before)?;
        let mut event = InterruptionEvent::new(
            scheduled.event_id,
            EventKind::ScheduledMaintenance,
            start_time,
        )
        .with_description(format!(
            "{} will occur between {} and {} because of {}",
            scheduled.code,
            scheduled.not_before,
            scheduled.not_after.as_deref().unwrap_or("unknown"),
            scheduled.description
        ));
        if let Some(not_after) = scheduled.not_after.as_deref().filter(|s| !s.is_empty()) {
            event = event.with_end_time(parse_scheduled_time(not_after)?);
        }

        if scheduled.state == STATE_CANCELED || scheduled.state == STATE_COMPLETED {
            outcome.cancellations.push(event);
        } else {
            outcome.interruptions.push(event);
        }
    }
    Ok(outcome)
}

fn parse_scheduled_time(value: &str) -> Result<DateTime<Utc>, DetectorError> {
    NaiveDateTime::parse_from_str(value, SCHEDULED_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| DetectorError::Parse {
            what: "scheduled event time",
            message: format!("{value}: {e}"),
        })
}
