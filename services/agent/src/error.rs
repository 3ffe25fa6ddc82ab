//! Error types for the spotwatch agent.
//!
//! Fatality is decided by the caller, not the error: an [`AgentError`] is
//! fatal on the offline path and only logged on the online path.

use spotwatch_interruption::LedgerError;
use thiserror::Error;

/// Errors talking to the build orchestrator.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Network-level failure.
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success status code.
    #[error("{url} returned {status}: {body}")]
    Protocol {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body could not be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl AgentError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// Returns true for transport-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns true for status or body failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Decode { .. })
    }
}

/// Errors reading instance metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("transport error reading metadata {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("metadata {path} returned {status}")]
    Status { path: String, status: u16 },

    #[error("metadata {path} is missing")]
    NotFound { path: String },
}

/// Errors from a detector poll. Always logged, never fatal.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },
}

/// Fatal errors that end the drain loop.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("failed to take agent {agent} offline: {source}")]
    MarkOffline {
        agent: String,
        #[source]
        source: AgentError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("drain loop terminated abnormally: {0}")]
    Panicked(#[from] tokio::task::JoinError),
}
