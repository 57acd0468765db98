use anyhow::Result;
use inventory_hedger::adapters::mock::{
    MockBitcoinBackend, MockInventoryOracle, MockLightningBackend, MockSwapContract,
};
use inventory_hedger::engine::Rails;
use inventory_hedger::exchange::OkxClient;
use inventory_hedger::supervisor::Supervisor;
use inventory_hedger::Config;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Inventory Hedger v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    info!(
        threshold_ppm = config.rebalance.threshold_ppm,
        amount_ppm = config.rebalance.amount_ppm,
        "Configuration loaded"
    );

    // The CEX client is live; the chain rails are provided by the hosting
    // node in production. Out of the box the daemon runs with simulated
    // rails for paper trading.
    let rails = Rails {
        contract: Arc::new(MockSwapContract::new()),
        bitcoin: Arc::new(MockBitcoinBackend::new()),
        lightning: Arc::new(MockLightningBackend::new()),
        exchange: Arc::new(OkxClient::new(&config.exchange)?),
        oracle: Arc::new(MockInventoryOracle::new()),
    };

    let supervisor = Supervisor::new(&config, rails).await?;
    supervisor.run().await
}
