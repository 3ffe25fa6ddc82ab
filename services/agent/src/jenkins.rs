//! Jenkins client for the agent state endpoints.
//!
//! - `GET {base}/computer/{agent}/api/json` reports the agent status
//! - `POST {base}/computer/{agent}/toggleOffline` flips it
//!
//! Both are authenticated with the API user and token over basic auth.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::agent::AgentControl;
use crate::config::JenkinsSettings;
use crate::error::AgentError;

/// Per-request transport timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body carried into an error.
const MAX_ERROR_BODY: usize = 512;

/// Agent status payload returned by Jenkins.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub temporarily_offline: bool,
    #[serde(default)]
    pub offline_cause_reason: Option<String>,
    #[serde(default)]
    pub num_executors: i32,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentStatus {
    pub fn is_online(&self) -> bool {
        !self.offline && !self.temporarily_offline
    }

    /// Taken offline through `toggleOffline`, as opposed to disconnected.
    pub fn is_temporarily_offline(&self) -> bool {
        self.temporarily_offline
    }
}

/// Jenkins API client bound to a single agent.
pub struct JenkinsClient {
    client: reqwest::Client,
    base_url: String,
    api_user: String,
    api_token: String,
    agent_name: String,
}

impl JenkinsClient {
    /// Create a client for `agent_name` on the configured master.
    pub fn new(settings: &JenkinsSettings, agent_name: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_user: settings.api_user.clone(),
            api_token: settings.api_token.clone(),
            agent_name: agent_name.into(),
        })
    }

    fn status_url(&self) -> String {
        format!("{}/computer/{}/api/json", self.base_url, self.agent_name)
    }

    fn toggle_url(&self) -> String {
        format!("{}/computer/{}/toggleOffline", self.base_url, self.agent_name)
    }

    /// Fetch the full status payload for the agent.
    pub async fn status(&self) -> Result<AgentStatus, AgentError> {
        let url = self.status_url();
        debug!(url = %url, "Fetching agent status");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_user, Some(&self.api_token))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AgentError::transport(&url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::transport(&url, e))?;

        if !status.is_success() {
            error!(status = %status, agent = %self.agent_name, "Failed to fetch agent status");
            return Err(protocol_error(url, status, body));
        }

        serde_json::from_str(&body).map_err(|e| AgentError::Decode {
            url,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl AgentControl for JenkinsClient {
    fn agent_name(&self) -> &str {
        &self.agent_name
    }

    async fn is_online(&self) -> Result<bool, AgentError> {
        let status = self.status().await?;
        debug!(
            agent = %self.agent_name,
            offline = status.offline,
            temporarily_offline = status.temporarily_offline,
            "Fetched agent status"
        );
        Ok(status.is_online())
    }

    async fn is_temporarily_offline(&self) -> Result<bool, AgentError> {
        let status = self.status().await?;
        debug!(
            agent = %self.agent_name,
            offline = status.offline,
            temporarily_offline = status.temporarily_offline,
            "Fetched agent status"
        );
        Ok(status.is_temporarily_offline())
    }

    async fn toggle(&self) -> Result<(), AgentError> {
        let url = self.toggle_url();
        debug!(url = %url, "Toggling agent state");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_user, Some(&self.api_token))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AgentError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, agent = %self.agent_name, "Failed to toggle agent state");
            debug!(body = %body, "Jenkins response");
            return Err(protocol_error(url, status, body));
        }

        Ok(())
    }
}

fn protocol_error(url: String, status: reqwest::StatusCode, mut body: String) -> AgentError {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    AgentError::Protocol {
        url,
        status: status.as_u16(),
        body,
    }
}
