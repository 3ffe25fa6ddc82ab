//! Error types for ledger access.

use thiserror::Error;

/// Errors returned by a [`crate::LedgerHandle`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger actor has stopped and no longer accepts requests.
    #[error("event ledger is closed")]
    Closed,
}
