//! Simplebank Simulator
//!
//! Opens a set of accounts, fires concurrent transfers at them through the
//! transfer engine and checks that the ledger still adds up afterwards.

use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simplebank_common::Currency;
use simplebank_ledger::{LedgerConfig, MemoryStore, PgStore, Store};

mod accounts;
mod controller;
mod metrics;
mod scenario;

use accounts::AccountSet;
use controller::SimulationController;
use scenario::Scenario;

/// Simplebank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent transfer load simulator for the Simplebank ledger")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "2")]
    accounts: usize,

    /// Scenario to run: one-way, interleaved or random
    #[arg(short, long, default_value = "interleaved")]
    scenario: String,

    /// Number of transfers to submit
    #[arg(short, long, default_value = "100")]
    transfers: usize,

    /// Number of concurrent workers
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Amount moved by each transfer, in minor units
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(i64).range(1..))]
    amount: i64,

    /// Opening balance of every account, in minor units
    #[arg(long, default_value = "1000000", value_parser = clap::value_parser!(i64).range(0..))]
    initial_balance: i64,

    /// Currency of the simulated accounts
    #[arg(long, default_value = "IDR")]
    currency: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Use PostgreSQL at DATABASE_URL instead of the in-memory store
    #[arg(long)]
    postgres: bool,

    /// Emit JSON logs and a JSON summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Simplebank Simulator");

    let config = LedgerConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let scenario = Scenario::load(&args.scenario)?;
    let currency = Currency::new(&args.currency);
    if !currency.is_supported() {
        anyhow::bail!("Unsupported currency: {}", currency);
    }

    if args.postgres {
        let store = PgStore::connect(&config).await?;
        store.migrate().await?;
        store.health_check().await?;
        simulate(Arc::new(store), scenario, &currency, &args).await
    } else {
        let store = MemoryStore::from_config(&config)?;
        simulate(Arc::new(store), scenario, &currency, &args).await
    }
}

async fn simulate<S: Store + 'static>(
    store: Arc<S>,
    scenario: Scenario,
    currency: &Currency,
    args: &Args,
) -> anyhow::Result<()> {
    let accounts =
        AccountSet::open(store.as_ref(), args.accounts, args.initial_balance, currency).await?;

    let mut rng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let plan = scenario.plan(&accounts.ids(), args.transfers, args.amount, &mut rng)?;

    info!(
        scenario = %scenario,
        accounts = args.accounts,
        transfers = args.transfers,
        workers = args.workers,
        "Running scenario"
    );

    let controller = SimulationController::new(store, args.workers);
    let elapsed = controller.run(&accounts, plan).await?;
    let summary = controller.metrics().await.summary(elapsed);
    let verification = controller.verify(&accounts).await?;

    if args.json {
        let report = serde_json::json!({
            "scenario": scenario,
            "elapsed_ms": elapsed.as_millis() as u64,
            "metrics": summary,
            "verification": verification,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Simulation complete");
        info!("Total transfers: {}", summary.total);
        info!("Successful: {}", summary.successful);
        info!("Rejected (insufficient funds): {}", summary.rejected);
        info!(
            "Failed: {} ({} retryable)",
            summary.failed, summary.retryable_failures
        );
        info!("p50 latency: {}us", summary.p50_latency_us);
        info!("p99 latency: {}us", summary.p99_latency_us);
        info!("Throughput: {:.1} transfers/s", summary.throughput_per_sec);
        info!(
            "Total balance: {} -> {}",
            verification.opening_total, verification.closing_total
        );
    }

    if !verification.is_ok() {
        anyhow::bail!(
            "ledger check failed: total {} -> {}, inconsistent accounts {:?}",
            verification.opening_total,
            verification.closing_total,
            verification.inconsistent_accounts
        );
    }

    Ok(())
}
