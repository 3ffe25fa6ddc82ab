//! Configuration for the spotwatch agent.
//!
//! Every setting can be given as a flag or through its environment variable.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

/// Well-known link-local address of the instance metadata service.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

/// Interval between detector polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between drain loop ticks.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration errors. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error(transparent)]
    Args(#[from] clap::Error),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// spotwatch - takes this Jenkins agent offline before the instance is reclaimed.
#[derive(Debug, Clone, Parser)]
#[command(name = "spotwatch", version, about, long_about = None)]
pub struct Config {
    /// URL of the instance metadata service. Only changed for testing.
    #[arg(long, env = "INSTANCE_METADATA_URL", default_value = DEFAULT_METADATA_URL)]
    pub metadata_url: String,

    /// Base URL of the Jenkins master.
    #[arg(long, env = "JENKINS_MASTER_URL")]
    pub jenkins_master_url: Option<String>,

    /// API user of the Jenkins master.
    #[arg(long, env = "JENKINS_MASTER_API_USER", default_value = "admin")]
    pub jenkins_master_api_user: String,

    /// API token of the Jenkins master.
    #[arg(long, env = "JENKINS_MASTER_API_TOKEN", hide_env_values = true)]
    pub jenkins_master_api_token: Option<String>,

    /// Seconds before an event's start time at which the agent is taken offline.
    #[arg(
        long,
        env = "NODE_TERMINATION_GRACE_PERIOD",
        default_value_t = spotwatch_interruption::DEFAULT_GRACE_PERIOD_SECS
    )]
    pub node_termination_grace_period: u32,

    /// Attempts per instance metadata read.
    #[arg(long, env = "METADATA_TRIES", default_value_t = 3)]
    pub metadata_tries: u32,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated Jenkins connection settings.
#[derive(Debug, Clone)]
pub struct JenkinsSettings {
    pub base_url: String,
    pub api_user: String,
    pub api_token: String,
}

impl Config {
    /// Parse flags and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::try_parse()?.validated()
    }

    /// Parse from an explicit argument list (environment fallbacks still apply).
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.jenkins()?;
        if self.metadata_url.trim().is_empty() {
            return Err(ConfigError::Missing("metadata url"));
        }
        if self.metadata_tries == 0 {
            return Err(ConfigError::Invalid {
                field: "metadata tries",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    /// The Jenkins settings, or the first missing one.
    pub fn jenkins(&self) -> Result<JenkinsSettings, ConfigError> {
        let base_url = non_empty(self.jenkins_master_url.as_deref())
            .ok_or(ConfigError::Missing("jenkins master url"))?;
        let api_user = non_empty(Some(self.jenkins_master_api_user.as_str()))
            .ok_or(ConfigError::Missing("jenkins master api user"))?;
        let api_token = non_empty(self.jenkins_master_api_token.as_deref())
            .ok_or(ConfigError::Missing("jenkins master api token"))?;

        Ok(JenkinsSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_user: api_user.to_string(),
            api_token: api_token.to_string(),
        })
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.node_termination_grace_period))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
