//! Execution sink: the single gateway for platform mutations. Approved
//! decisions open positions here; tracker close requests drain here. Every
//! platform call goes through the circuit breaker.

use crate::application::memory::PortfolioMemory;
use crate::application::monitor::{CloseRequest, TradeMonitor};
use crate::domain::decision::{Decision, TradeAction, TradeOutcome};
use crate::domain::errors::EngineError;
use crate::domain::portfolio::{Position, PositionSide};
use crate::domain::ports::{OrderRequest, TradingPlatform};
use crate::infrastructure::breaker::CircuitBreaker;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::store::DecisionStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct ExecutionSink {
    platform: Arc<dyn TradingPlatform>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<DecisionStore>,
    memory: Arc<Mutex<PortfolioMemory>>,
    monitor: Arc<TradeMonitor>,
    metrics: Metrics,
    close_retry_limit: u32,
}

impl ExecutionSink {
    pub fn new(
        platform: Arc<dyn TradingPlatform>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<DecisionStore>,
        memory: Arc<Mutex<PortfolioMemory>>,
        monitor: Arc<TradeMonitor>,
        metrics: Metrics,
        close_retry_limit: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            breaker,
            store,
            memory,
            monitor,
            metrics,
            close_retry_limit,
        })
    }

    /// Execute an approved decision and attach its tracker. The decision id
    /// doubles as the platform client id, so retries cannot double-fill.
    pub async fn execute_decision(&self, decision: &Decision) -> Result<Position, EngineError> {
        let side = match decision.action {
            TradeAction::Buy => PositionSide::Long,
            TradeAction::Sell => PositionSide::Short,
            TradeAction::Hold => {
                return Err(EngineError::invariant("HOLD decision reached execution"));
            }
        };

        let order = OrderRequest {
            client_id: decision.id,
            asset: decision.asset.clone(),
            side,
            quantity: decision.suggested_size,
            stop_loss_pct: decision.stop_loss_pct,
            take_profit_pct: decision.take_profit_pct,
        };

        let receipt = self.breaker.call(self.platform.execute(order)).await?;
        info!(
            "ExecutionSink: Filled {} {} {} @ {} (position {})",
            side, decision.suggested_size, decision.asset, receipt.filled_price, receipt.position_id
        );

        let position = Position {
            id: receipt.position_id,
            asset: decision.asset.clone(),
            side,
            entry_price: receipt.filled_price,
            quantity: decision.suggested_size,
            entry_time: Utc::now(),
            mark_price: receipt.filled_price,
        };

        self.monitor.attach(&position, decision).await?;
        Ok(position)
    }

    /// Drain tracker close requests until shutdown.
    pub fn spawn_close_loop(
        self: Arc<Self>,
        mut close_rx: mpsc::Receiver<CloseRequest>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sink = self;
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_request = close_rx.recv() => {
                        match maybe_request {
                            Some(request) => sink.handle_close(request).await,
                            None => {
                                info!("ExecutionSink: Close channel closed; loop exiting");
                                return;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            // Drain whatever is already queued before exiting
                            while let Ok(request) = close_rx.try_recv() {
                                sink.handle_close(request).await;
                            }
                            info!("ExecutionSink: Close loop shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Close with bounded retries; a confirmed close writes the outcome and
    /// feeds the portfolio memory.
    pub async fn handle_close(&self, request: CloseRequest) {
        let mut attempt = 0u32;
        let receipt = loop {
            attempt += 1;
            match self
                .breaker
                .call(self.platform.close_position(&request.position_id))
                .await
            {
                Ok(receipt) => break receipt,
                Err(e) if e.is_transient() && attempt < self.close_retry_limit => {
                    warn!(
                        "ExecutionSink: Close attempt {}/{} for {} failed: {}",
                        attempt, self.close_retry_limit, request.position_id, e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(
                        "ExecutionSink: Close FAILED for {} after {} attempts: {}",
                        request.position_id, attempt, e
                    );
                    self.monitor
                        .escalate(&request.position_id, e.to_string())
                        .await;
                    return;
                }
            }
        };

        let Some(state) = self
            .monitor
            .confirm_close(&request.position_id, receipt.realized_pnl)
            .await
        else {
            warn!(
                "ExecutionSink: Close confirmed for untracked position {}",
                request.position_id
            );
            return;
        };

        let outcome = TradeOutcome {
            position_id: request.position_id.clone(),
            decision_id: state.decision_id,
            exit_price: receipt.exit_price,
            exit_time: Utc::now(),
            realized_pnl: receipt.realized_pnl,
            closed_by: request.reason,
        };

        self.metrics
            .trades_closed_total
            .with_label_values(&[&request.reason.to_string()])
            .inc();

        if let Err(e) = self.store.append_outcome(state.decision_id, outcome.clone()).await {
            error!(
                "ExecutionSink: Failed to append outcome for decision {}: {}",
                state.decision_id, e
            );
        }

        match self.store.get(state.decision_id).await {
            Ok(Some(decision)) => {
                self.memory.lock().await.record_outcome(&decision, &outcome);
            }
            Ok(None) => warn!(
                "ExecutionSink: No stored decision {} for outcome feedback",
                state.decision_id
            ),
            Err(e) => warn!("ExecutionSink: Decision lookup failed: {}", e),
        }

        info!(
            "ExecutionSink: Position {} closed ({}, pnl {})",
            request.position_id, request.reason, receipt.realized_pnl
        );
    }
}
