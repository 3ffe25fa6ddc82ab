//! spotwatch
//!
//! Sidecar daemon for Jenkins build agents on reclaimable cloud instances.
//!
//! ## Architecture
//!
//! - **Detectors**: Poll instance metadata for spot and maintenance notices
//! - **Ledger**: Tracks the notices that are currently in effect
//! - **Drain loop**: Takes the agent offline while a notice is due
//! - **Cancellation consumer**: Brings the agent back once every notice is withdrawn
//!
//! Exits with 0 after SIGTERM/SIGINT, and with 1 on a configuration error, when
//! the node identity cannot be read, or when the agent cannot be taken offline.

use std::process::ExitCode;
use std::sync::Arc;

use spotwatch_agent::config::{Config, ConfigError, LogFormat};
use spotwatch_agent::detector::{MaintenanceDetector, SpotDetector};
use spotwatch_agent::ingest::Detectors;
use spotwatch_agent::shutdown::wait_for_signal;
use spotwatch_agent::{Daemon, JenkinsClient, MetadataClient};
use spotwatch_interruption::EventLedger;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Args(e)) if !e.use_stderr() => {
            // --help / --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            init_tracing(LogFormat::Text);
            error!(error = %e, "Failed to parse configuration");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => {
            info!("spotwatch shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "spotwatch exiting");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .init(),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let jenkins = config.jenkins()?;
    info!(
        jenkins_master_url = %jenkins.base_url,
        metadata_url = %config.metadata_url,
        grace_period_secs = config.node_termination_grace_period,
        "Configuration loaded"
    );

    let metadata = Arc::new(MetadataClient::new(
        &config.metadata_url,
        config.metadata_tries,
    )?);
    let identity = metadata.node_identity().await?;

    let agent = Arc::new(JenkinsClient::new(&jenkins, identity.instance_id.clone())?);
    let detectors = Detectors {
        spot: Arc::new(SpotDetector::new(Arc::clone(&metadata))),
        maintenance: Arc::new(MaintenanceDetector::new(metadata)),
    };

    let daemon = Daemon::new(EventLedger::new(config.grace_period()), agent, detectors);
    let shutdown_signal = async {
        if let Err(e) = wait_for_signal().await {
            error!(error = %e, "Failed to listen for shutdown signals");
            std::future::pending::<()>().await;
        }
    };

    let span = info_span!("spotwatch", instance_id = %identity.instance_id);
    daemon.run(shutdown_signal).instrument(span).await?;
    Ok(())
}
