//! Engine bootstrap: constructs and wires every component from a `Config`
//! and the injected external services.

use crate::application::agent::{AgentDeps, LoopAgent};
use crate::application::aggregator::DecisionAggregator;
use crate::application::aggregator::stacking::MetaLearner;
use crate::application::context_builder::ContextBuilder;
use crate::application::execution::ExecutionSink;
use crate::application::memory::PortfolioMemory;
use crate::application::monitor::TradeMonitor;
use crate::application::risk::RiskGatekeeper;
use crate::config::Config;
use crate::domain::ports::{
    ApprovalChannel, DecisionProvider, MarketDataProvider, TradingPlatform,
};
use crate::infrastructure::breaker::CircuitBreaker;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::store::DecisionStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// External collaborators whose concrete implementations live outside the
/// core: venue, market data, AI providers, approval surface.
pub struct ExternalServices {
    pub platform: Arc<dyn TradingPlatform>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub providers: Vec<Arc<dyn DecisionProvider>>,
    pub approval: Arc<dyn ApprovalChannel>,
    pub meta_learner: Arc<dyn MetaLearner>,
}

pub struct Engine {
    pub agent: Arc<LoopAgent>,
    pub monitor: Arc<TradeMonitor>,
    pub store: Arc<DecisionStore>,
    pub memory: Arc<Mutex<PortfolioMemory>>,
    pub metrics: Metrics,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub async fn build(config: Config, services: ExternalServices) -> Result<Engine> {
        let metrics = Metrics::new()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let store = Arc::new(
            DecisionStore::open(config.decisions_dir.clone())
                .await
                .context("Failed to open decision store")?,
        );

        let memory = Arc::new(Mutex::new(PortfolioMemory::new(
            &config.ensemble.providers,
            &config.ensemble.weights,
            config.learning_rate,
            config.min_samples_per_regime,
            Some(PathBuf::from(&config.memory_path)),
        )));

        let aggregator = Arc::new(
            DecisionAggregator::new(
                &config.ensemble,
                services.providers,
                services.meta_learner,
                metrics.clone(),
            )
            .context("Failed to build decision aggregator")?,
        );

        let gatekeeper = Arc::new(RiskGatekeeper::new(&config.risk, metrics.clone()));

        let breaker = Arc::new(
            CircuitBreaker::new(
                services.platform.name().to_string(),
                config.risk.breaker_failure_threshold,
                Duration::from_secs(config.risk.breaker_recovery_timeout_secs),
            )
            .with_metrics(metrics.clone()),
        );

        let (close_tx, close_rx) = mpsc::channel(64);
        let (alert_tx, alert_rx) = mpsc::channel(16);

        let monitor = TradeMonitor::new(
            config.monitor.clone(),
            Arc::clone(&services.market_data),
            close_tx,
            alert_tx,
            metrics.clone(),
            shutdown_rx.clone(),
        );

        let sink = ExecutionSink::new(
            Arc::clone(&services.platform),
            Arc::clone(&breaker),
            Arc::clone(&store),
            Arc::clone(&memory),
            Arc::clone(&monitor),
            metrics.clone(),
            config.monitor.close_retry_limit,
        );

        let context_provider = Arc::new(ContextBuilder::new(
            Arc::clone(&services.market_data),
            config.agent.asset_class,
            config.risk.high_vol_threshold,
        ));

        let tasks = vec![
            Arc::clone(&sink).spawn_close_loop(close_rx, shutdown_rx.clone()),
            Arc::clone(&monitor).spawn_portfolio_watch(),
        ];

        let deps = AgentDeps {
            context_provider,
            aggregator,
            gatekeeper,
            platform: services.platform,
            breaker,
            sink,
            monitor: Arc::clone(&monitor),
            store: Arc::clone(&store),
            memory: Arc::clone(&memory),
            approval: services.approval,
            market_data: services.market_data,
            metrics: metrics.clone(),
        };

        let agent = LoopAgent::new(config, deps, shutdown_tx, alert_rx);
        info!("Engine: Built and wired");

        Ok(Engine {
            agent,
            monitor,
            store,
            memory,
            metrics,
            tasks,
        })
    }

    /// Spawn the agent loop; the returned handle resolves when it stops.
    pub fn start(&self) -> JoinHandle<()> {
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            agent.run().await;
        })
    }

    /// Cooperative shutdown of every spawned task.
    pub async fn shutdown(self) {
        self.agent.stop();
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        info!("Engine: Shut down");
    }
}
