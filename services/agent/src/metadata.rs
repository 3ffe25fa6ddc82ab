//! Instance metadata client.
//!
//! Reads from the instance metadata service (IMDS):
//! - Node identity, fetched once at startup
//! - Spot interruption notices and scheduled maintenance events, polled by
//!   the detectors
//!
//! Requests use an IMDSv2 session token when the service hands one out and
//! fall back to IMDSv1 otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MetadataError;

const TOKEN_PATH: &str = "/latest/api/token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: u64 = 21600;

/// Refresh the token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
pub const INSTANCE_TYPE_PATH: &str = "/latest/meta-data/instance-type";
pub const AVAILABILITY_ZONE_PATH: &str = "/latest/meta-data/placement/availability-zone";
pub const LOCAL_HOSTNAME_PATH: &str = "/latest/meta-data/local-hostname";
pub const SPOT_ACTION_PATH: &str = "/latest/meta-data/spot/instance-action";
pub const SCHEDULED_EVENTS_PATH: &str = "/latest/meta-data/events/maintenance/scheduled";

/// Static descriptor of this machine. The instance id is the agent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub instance_id: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub local_hostname: String,
}

impl NodeIdentity {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_type: String::new(),
            availability_zone: String::new(),
            local_hostname: String::new(),
        }
    }
}

struct SessionToken {
    value: String,
    expires_at: Instant,
}

/// Instance metadata service client.
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
    tries: u32,
    retry_delay: Duration,
    token: Mutex<Option<SessionToken>>,
    v1_fallback_logged: AtomicBool,
}

impl MetadataClient {
    /// Create a client. `tries` is the number of attempts per read.
    pub fn new(base_url: &str, tries: u32) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tries: tries.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            token: Mutex::new(None),
            v1_fallback_logged: AtomicBool::new(false),
        })
    }

    /// Override the base delay between retries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Fetch the node identity. Only the instance id is required.
    pub async fn node_identity(&self) -> Result<NodeIdentity, MetadataError> {
        let instance_id = self
            .get(INSTANCE_ID_PATH)
            .await?
            .ok_or_else(|| MetadataError::NotFound {
                path: INSTANCE_ID_PATH.to_string(),
            })?;

        let identity = NodeIdentity {
            instance_id: instance_id.trim().to_string(),
            instance_type: self.get_optional(INSTANCE_TYPE_PATH).await,
            availability_zone: self.get_optional(AVAILABILITY_ZONE_PATH).await,
            local_hostname: self.get_optional(LOCAL_HOSTNAME_PATH).await,
        };

        info!(
            instance_id = %identity.instance_id,
            instance_type = %identity.instance_type,
            availability_zone = %identity.availability_zone,
            local_hostname = %identity.local_hostname,
            "Fetched node identity"
        );
        Ok(identity)
    }

    /// Read a metadata path. `Ok(None)` means the path does not exist.
    pub async fn get(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let mut attempt = 1;
        loop {
            match self.get_once(path).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.tries => return Err(e),
                Err(e) => {
                    debug!(path, attempt, error = %e, "Metadata read failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_optional(&self, path: &str) -> String {
        match self.get(path).await {
            Ok(value) => value.unwrap_or_default().trim().to_string(),
            Err(e) => {
                warn!(path, error = %e, "Failed to read optional metadata");
                String::new()
            }
        }
    }

    async fn get_once(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if let Some(token) = self.session_token().await {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| MetadataError::Transport {
            path: path.to_string(),
            source: e,
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token expired or was revoked; the next attempt fetches a new one.
            *self.token.lock().await = None;
        }
        if !status.is_success() {
            return Err(MetadataError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| MetadataError::Transport {
            path: path.to_string(),
            source: e,
        })?;
        Ok(Some(body))
    }

    /// Current IMDSv2 token, or `None` to fall back to IMDSv1.
    async fn session_token(&self) -> Option<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Some(token.value.clone());
            }
        }

        match self.fetch_token().await {
            Ok(value) => {
                *cached = Some(SessionToken {
                    value: value.clone(),
                    expires_at: Instant::now() + Duration::from_secs(TOKEN_TTL_SECS),
                });
                Some(value)
            }
            Err(e) => {
                *cached = None;
                if !self.v1_fallback_logged.swap(true, Ordering::Relaxed) {
                    warn!(error = %e, "Unable to get an IMDSv2 token, continuing with IMDSv1");
                }
                None
            }
        }
    }

    async fn fetch_token(&self) -> Result<String, MetadataError> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let response = self
            .client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS.to_string())
            .send()
            .await
            .map_err(|e| MetadataError::Transport {
                path: TOKEN_PATH.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                path: TOKEN_PATH.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| MetadataError::Transport {
            path: TOKEN_PATH.to_string(),
            source: e,
        })
    }
}
