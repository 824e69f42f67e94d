//! Perceptix Daemon - incident lifecycle orchestrator
//!
//! Observes data-reliability metrics, investigates anomalies with an
//! LLM-assisted reasoning loop, and drives approval-gated remediation.

use anyhow::{Context, Result};
use perceptix_common::PerceptixConfig;
use perceptixd::historian::Historian;
use perceptixd::observer::{DemoObserver, DemoScenario};
use perceptixd::orchestrator::PerceptixSystem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Perceptix Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = PerceptixConfig::load_default();
    info!(
        "Configuration loaded: mode={:?}, provider={}, model={}",
        config.system.mode, config.api.provider, config.api.model_name
    );

    let historian = Arc::new(
        Historian::open(&config.database.path)
            .with_context(|| format!("opening database at {}", config.database.path.display()))?,
    );
    info!(
        "Historian ready: {} incidents on record",
        historian.incident_count().unwrap_or(0)
    );

    let scenario = DemoScenario::from_env();
    let observer = Arc::new(DemoObserver::new(scenario));
    info!("Observer ready (scenario: {:?})", scenario);

    let system = PerceptixSystem::new(config.clone(), observer, Arc::clone(&historian))?;
    info!("Perceptix Daemon ready");

    let interval = Duration::from_secs(
        std::env::var("PERCEPTIX_CYCLE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
    );

    let mut cycle_id: u64 = 1;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down gracefully");
                break;
            }
            result = system.run_cycle(cycle_id) => {
                match result {
                    Ok(Some(report)) => info!(
                        "Cycle {} produced incident {} ({})",
                        cycle_id,
                        report.report_id,
                        report.incident_type.as_str()
                    ),
                    Ok(None) => info!("Cycle {} completed: healthy", cycle_id),
                    Err(perceptix_common::PerceptixError::CycleLimitExceeded(msg)) => {
                        warn!("{}; stopping", msg);
                        break;
                    }
                    Err(e) => error!("Cycle {} failed: {}", cycle_id, e),
                }
                cycle_id += 1;
                tokio::time::sleep(interval).await;
            }
        }
    }

    Ok(())
}
