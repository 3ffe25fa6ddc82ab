//! spotwatch agent library
//!
//! spotwatch runs next to a Jenkins build agent on a cloud instance. When the
//! instance is about to be reclaimed (spot interruption or scheduled
//! maintenance) it takes the agent offline so no new builds land on it, and
//! brings it back online if the notice is withdrawn.
//!
//! ## Architecture
//!
//! ```text
//! SpotDetector ──────┐                          ┌─> interruption consumer ─┐
//!                    ├─> signal channels ───────┤                          ├─> LedgerActor
//! MaintenanceDetector┘                          └─> cancellation consumer ─┤      ^
//!                                                        │ mark_online      │      │
//!                                                        v                  │      │
//!                                                   JenkinsClient <── DrainOrchestrator
//!                                                                      mark_offline
//! ```
//!
//! ## Modules
//!
//! - `agent`: agent state interface and mock
//! - `jenkins`: Jenkins implementation of the agent state interface
//! - `metadata`: instance metadata client and node identity
//! - `detector`: spot and scheduled maintenance detectors
//! - `ingest`: producer and consumer tasks
//! - `drain`: drain loop
//! - `shutdown`: shutdown signal handling
//! - `daemon`: wiring of all of the above

pub mod agent;
pub mod config;
pub mod daemon;
pub mod detector;
pub mod drain;
pub mod error;
pub mod ingest;
pub mod jenkins;
pub mod metadata;
pub mod shutdown;

// Re-export commonly used types
pub use agent::{AgentControl, AgentOnlineState, MockAgent};
pub use config::{Config, ConfigError, LogFormat};
pub use daemon::Daemon;
pub use error::{AgentError, DetectorError, DrainError, MetadataError};
pub use jenkins::JenkinsClient;
pub use metadata::{MetadataClient, NodeIdentity};
