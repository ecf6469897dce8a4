//! Sagetrade - headless autonomous trading orchestrator
//!
//! Runs the full OODA loop against the mock platform and mock market data,
//! suitable for demos and soak runs. Real venue and provider adapters plug
//! in through the same `ExternalServices` seam.
//!
//! # Usage
//! ```sh
//! ANALYSIS_FREQUENCY_SECS=10 cargo run
//! ```

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use sagetrade::application::aggregator::stacking::ConsensusMetaLearner;
use sagetrade::application::system::{Engine, ExternalServices};
use sagetrade::config::Config;
use sagetrade::domain::decision::TradeAction;
use sagetrade::domain::ports::{AutoApprove, DecisionProvider};
use sagetrade::infrastructure::mock::{MockMarketData, MockTradingPlatform, ScriptedProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "sagetrade", about = "Autonomous trading orchestrator (mock mode)")]
struct Cli {
    /// Override the decisions directory
    #[arg(long)]
    decisions_dir: Option<String>,

    /// Override the idle delay between cycles, in seconds
    #[arg(long)]
    frequency_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Sagetrade {} starting (mock mode)...", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.decisions_dir {
        config.decisions_dir = dir;
    }
    if let Some(secs) = cli.frequency_secs {
        config.agent.analysis_frequency_secs = secs;
    }
    info!(
        "Configuration loaded: strategy={:?}, assets={:?}, approval={:?}",
        config.ensemble.strategy, config.agent.asset_pairs, config.agent.approval_policy
    );

    // Mock collaborators: settable market, idempotent platform, scripted
    // providers named after the ensemble configuration.
    let market = Arc::new(MockMarketData::new());
    for asset in &config.agent.asset_pairs {
        market.set_price(asset, Decimal::from(30000)).await;
    }
    let platform = Arc::new(MockTradingPlatform::new(
        Arc::clone(&market),
        Decimal::from(100_000),
    ));

    let providers: Vec<Arc<dyn DecisionProvider>> = config
        .ensemble
        .providers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let provider: Arc<dyn DecisionProvider> = if i == 0 {
                Arc::new(ScriptedProvider::new(
                    name,
                    TradeAction::Buy,
                    72.0,
                    "mock momentum signal",
                ))
            } else {
                Arc::new(ScriptedProvider::new(name, TradeAction::Hold, 50.0, "flat"))
            };
            provider
        })
        .collect();

    // Gentle random walk so trackers and the portfolio watch have work.
    {
        let market = Arc::clone(&market);
        let assets = config.agent.asset_pairs.clone();
        tokio::spawn(async move {
            let mut price = 30000.0f64;
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let step: f64 = rand::rng().random_range(-0.002..0.002);
                price *= 1.0 + step;
                for asset in &assets {
                    market
                        .set_price(asset, Decimal::from_f64(price).unwrap_or(Decimal::ONE))
                        .await;
                }
            }
        });
    }

    let services = ExternalServices {
        platform,
        market_data: market,
        providers,
        approval: Arc::new(AutoApprove),
        meta_learner: Arc::new(ConsensusMetaLearner::default()),
    };

    let engine = Engine::build(config, services).await?;
    let agent_handle = engine.start();
    info!("Trading loop running. Press Ctrl+C to shutdown.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
        _ = agent_handle => {
            info!("Agent loop terminated on its own.");
        }
    }

    engine.shutdown().await;
    Ok(())
}
