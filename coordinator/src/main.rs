//! NostroVostro settlement service binary.
//!
//! Reads one JSON request per line on stdin and writes one JSON reply per
//! line on stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nostrovostro_coordinator::command;
use nostrovostro_coordinator::{Coordinator, CoordinatorConfig};
use nostrovostro_ledger::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoordinatorConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting NostroVostro settlement service");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let coordinator = Coordinator::new(config, Arc::new(MemoryStore::new()))?;
    coordinator.start().await?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                warn!(error = %e, "Cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };
    command::serve(
        &coordinator,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await?;

    coordinator.stop();
    info!(metrics = %serde_json::to_string(&coordinator.metrics())?, "Shutdown complete");
    Ok(())
}
