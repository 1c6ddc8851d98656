use ampwise::clock::SystemClock;
use ampwise::host::InMemoryHost;
use ampwise::{ChargingAutomation, Config};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        anyhow::anyhow!("Failed to load configuration: {e}")
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    ampwise::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    info!(
        "Ampwise charging automation v{} starting up",
        env!("CARGO_PKG_VERSION")
    );

    // Dry-run host: states come from the simulation section
    let host = InMemoryHost::new();
    host.seed(config.simulation.states.clone());
    let host = Arc::new(host);

    let mut automation = ChargingAutomation::new(config, host, Arc::new(SystemClock))
        .map_err(|e| anyhow::anyhow!("Failed to build automation: {e}"))?;
    let running = automation.start();
    if running.is_empty() {
        error!("No policy could be started; check the entities configuration");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    automation.shutdown();
    if let Some(sequencer) = automation.sequencer() {
        sequencer.wait_idle().await;
    }
    info!("Shutdown complete");
    Ok(())
}
