//! NostroVostro Simulator
//!
//! Drives the settlement service with scripted scenarios or generated load
//! and checks the ledger against the journal afterwards.

use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use nostrovostro_coordinator::CoordinatorConfig;
use scenario::Scenario;

/// NostroVostro Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "NostroVostro settlement simulation environment")]
struct Args {
    /// Scenario name or path to a scenario JSON file
    #[arg(short, long)]
    scenario: Option<String>,

    /// Generated instructions when no scenario is given
    #[arg(short, long, default_value = "1000")]
    count: usize,

    /// Submissions in flight at once
    #[arg(long, default_value = "16")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Use a store without atomic batches
    #[arg(long)]
    no_batches: bool,

    /// Settlement attempt timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// List built-in scenarios and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list {
        for name in Scenario::builtin() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = CoordinatorConfig::from_env();
    config.settlement_config.timeout = Duration::from_millis(args.timeout_ms);
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!("Starting NostroVostro Simulator");
    let started = Instant::now();

    match &args.scenario {
        Some(name) => {
            let scenario = Scenario::load(name)?;
            let unbatched = scenario.unbatched || args.no_batches;
            let mut controller = SimulationController::new(config, unbatched, args.seed).await?;
            controller.run_scenario(&scenario).await?;
            finish(&controller, started.elapsed()).await?;
        }
        None => {
            let mut controller =
                SimulationController::new(config, args.no_batches, args.seed).await?;
            controller.run_random(args.count, args.concurrency).await?;
            finish(&controller, started.elapsed()).await?;
        }
    }

    Ok(())
}

async fn finish(controller: &SimulationController, elapsed: Duration) -> anyhow::Result<()> {
    controller.verify_ledger().await?;

    let metrics = controller.metrics();
    let service = controller.coordinator().metrics();
    info!("Simulation complete");
    info!("Submitted: {}", metrics.total());
    info!("Completed: {}", metrics.completed);
    info!("Rejected: {}", metrics.rejected);
    info!("Errored: {}", metrics.errored);
    info!("Completion rate: {:.1}%", metrics.completion_rate() * 100.0);
    info!("Throughput: {:.0}/s", metrics.throughput(elapsed));
    info!(
        "Latency avg/p50/p99: {}/{}/{}µs",
        metrics.average_latency_us(),
        metrics.p50_latency_us(),
        metrics.p99_latency_us()
    );
    info!(
        "Service: {} CAS retries, {} timeouts, {} partial commits",
        service.cas_retries, service.timeouts, service.partial_commits
    );
    Ok(())
}
