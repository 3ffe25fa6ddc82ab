//! Agent state interface and mock implementation.
//!
//! The agent state interface abstracts the build orchestrator's view of this
//! node:
//! - Taking the agent offline before the instance is reclaimed
//! - Bringing it back online when the notice is withdrawn
//!
//! Both transitions check the current status first. The orchestrator only
//! exposes a toggle, so issuing it blindly could flip the agent the wrong way.
//!
//! A mock implementation is provided for testing and development.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::AgentError;

/// Agent online/offline state as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOnlineState {
    Online,
    Offline,
}

impl AgentOnlineState {
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Agent state interface.
#[async_trait]
pub trait AgentControl: Send + Sync {
    /// Name of the agent in the orchestrator.
    fn agent_name(&self) -> &str;

    /// Query whether the agent is currently online and accepting builds.
    async fn is_online(&self) -> Result<bool, AgentError>;

    /// Query whether the agent was taken offline by an operator or by us.
    ///
    /// A disconnected agent is offline without being temporarily offline.
    async fn is_temporarily_offline(&self) -> Result<bool, AgentError>;

    /// Flip the agent's temporarily-offline flag.
    async fn toggle(&self) -> Result<(), AgentError>;

    /// Take the agent offline. Succeeds without a toggle if already offline.
    async fn mark_offline(&self) -> Result<(), AgentError> {
        if !self.is_online().await? {
            info!(agent = %self.agent_name(), "Agent already offline");
            return Ok(());
        }

        info!(agent = %self.agent_name(), "Marking agent offline");
        self.toggle().await
    }

    /// Bring the agent online. Only clears the temporarily-offline flag; an
    /// agent that is merely disconnected is left alone.
    async fn mark_online(&self) -> Result<(), AgentError> {
        if !self.is_temporarily_offline().await? {
            info!(agent = %self.agent_name(), "Agent not temporarily offline");
            return Ok(());
        }

        info!(agent = %self.agent_name(), "Marking agent online");
        self.toggle().await
    }
}

/// In-memory agent for tests and dry runs.
pub struct MockAgent {
    name: String,
    online: AtomicBool,
    disconnected: AtomicBool,
    toggles: AtomicUsize,
    status_queries: AtomicUsize,
    fail_status: AtomicBool,
    fail_toggle: AtomicBool,
}

impl MockAgent {
    /// Create a mock agent that starts online.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            toggles: AtomicUsize::new(0),
            status_queries: AtomicUsize::new(0),
            fail_status: AtomicBool::new(false),
            fail_toggle: AtomicBool::new(false),
        }
    }

    /// Create a mock agent that starts offline.
    pub fn offline(name: impl Into<String>) -> Self {
        let agent = Self::new(name);
        agent.online.store(false, Ordering::SeqCst);
        agent
    }

    /// Simulate the agent losing (or regaining) its connection to the master.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Make every toggle fail with a protocol error.
    pub fn fail_toggles(&self, fail: bool) {
        self.fail_toggle.store(fail, Ordering::SeqCst);
    }

    /// Make every status query fail with a protocol error.
    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn state(&self) -> AgentOnlineState {
        AgentOnlineState::from_online(
            self.online.load(Ordering::SeqCst) && !self.disconnected.load(Ordering::SeqCst),
        )
    }

    pub fn toggle_count(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }

    pub fn status_query_count(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    fn query_status(&self) -> Result<(), AgentError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(self.injected("status"));
        }
        Ok(())
    }

    fn injected(&self, what: &str) -> AgentError {
        AgentError::Protocol {
            url: format!("mock://{}/{}", self.name, what),
            status: 500,
            body: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl AgentControl for MockAgent {
    fn agent_name(&self) -> &str {
        &self.name
    }

    async fn is_online(&self) -> Result<bool, AgentError> {
        self.query_status()?;
        Ok(self.state() == AgentOnlineState::Online)
    }

    async fn is_temporarily_offline(&self) -> Result<bool, AgentError> {
        self.query_status()?;
        Ok(!self.online.load(Ordering::SeqCst))
    }

    async fn toggle(&self) -> Result<(), AgentError> {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        if self.fail_toggle.load(Ordering::SeqCst) {
            return Err(self.injected("toggle"));
        }
        self.online.fetch_xor(true, Ordering::SeqCst);
        Ok(())
    }
}
