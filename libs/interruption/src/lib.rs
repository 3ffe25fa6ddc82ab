//! # spotwatch-interruption
//!
//! Interruption event types and the ledger that tracks them for a single node.
//!
//! ## Event Lifecycle
//!
//! - A detector observes a reclamation notice and produces an [`InterruptionEvent`]
//! - The event is added to the [`EventLedger`], keyed by its [`EventId`]
//! - Once the drain lead time is reached the event is *pending drain*
//! - After the node has been taken offline the ledger marks it drained
//! - A withdrawal removes it; when nothing is tracked the node may be uncordoned
//!
//! ## Ownership
//!
//! The ledger is plain data. At runtime it is owned by a [`LedgerActor`] task and
//! shared through cloneable [`LedgerHandle`]s, so every operation is atomic and
//! callers never lock anything themselves.

mod actor;
mod error;
mod event;
mod ledger;

pub use actor::{LedgerActor, LedgerHandle, LedgerMessage};
pub use error::LedgerError;
pub use event::{EventId, EventKind, InterruptionEvent};
pub use ledger::{EventLedger, DEFAULT_GRACE_PERIOD_SECS};
