//! The supervising loop agent: sequences the OODA phases, enforces the
//! global gates, and owns cancellation for every spawned task.

use crate::application::aggregator::{DecisionAggregator, DecisionDefaults};
use crate::application::agent::states::{AgentEvent, AgentState, next_state};
use crate::application::context_builder::correlation_matrix;
use crate::application::execution::ExecutionSink;
use crate::application::memory::PortfolioMemory;
use crate::application::monitor::{MonitorAlert, TradeMonitor};
use crate::application::risk::RiskGatekeeper;
use crate::config::{ApprovalPolicy, Config, ConfigPatch};
use crate::domain::asset::AssetPair;
use crate::domain::decision::{CloseReason, Decision, TradeAction};
use crate::domain::errors::EngineError;
use crate::domain::market::{MarketContext, Timeframe};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::ports::{ApprovalChannel, ContextProvider, TradingPlatform};
use crate::domain::risk::RiskContext;
use crate::infrastructure::breaker::CircuitBreaker;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::store::{DecisionFilter, DecisionStore};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{error, info, warn};

/// Everything the agent orchestrates; injected, never global.
pub struct AgentDeps {
    pub context_provider: Arc<dyn ContextProvider>,
    pub aggregator: Arc<DecisionAggregator>,
    pub gatekeeper: Arc<RiskGatekeeper>,
    pub platform: Arc<dyn TradingPlatform>,
    pub breaker: Arc<CircuitBreaker>,
    pub sink: Arc<ExecutionSink>,
    pub monitor: Arc<TradeMonitor>,
    pub store: Arc<DecisionStore>,
    pub memory: Arc<Mutex<PortfolioMemory>>,
    pub approval: Arc<dyn ApprovalChannel>,
    pub market_data: Arc<dyn crate::domain::ports::MarketDataProvider>,
    pub metrics: Metrics,
}

struct CycleState {
    market: Option<MarketContext>,
    portfolio: Option<PortfolioSnapshot>,
    candidate: Option<Decision>,
}

struct DailyCounter {
    date: NaiveDate,
    trades: u32,
}

pub struct LoopAgent {
    config: Arc<RwLock<Config>>,
    deps: AgentDeps,
    shutdown_tx: watch::Sender<bool>,
    alert_rx: Mutex<mpsc::Receiver<MonitorAlert>>,
    daily: Mutex<DailyCounter>,
    /// Set when the kill switch (or a fatal escalation) demands a stop.
    kill_reason: Mutex<Option<String>>,
    state: RwLock<AgentState>,
    asset_cursor: AtomicUsize,
}

impl LoopAgent {
    pub fn new(
        config: Config,
        deps: AgentDeps,
        shutdown_tx: watch::Sender<bool>,
        alert_rx: mpsc::Receiver<MonitorAlert>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(RwLock::new(config)),
            deps,
            shutdown_tx,
            alert_rx: Mutex::new(alert_rx),
            daily: Mutex::new(DailyCounter {
                date: Utc::now().date_naive(),
                trades: 0,
            }),
            kill_reason: Mutex::new(None),
            state: RwLock::new(AgentState::Idle),
            asset_cursor: AtomicUsize::new(0),
        })
    }

    pub async fn current_state(&self) -> AgentState {
        *self.state.read().await
    }

    /// Cooperative shutdown: every task observes the watch channel at its
    /// next suspension point.
    pub fn stop(&self) {
        info!("LoopAgent: Stop requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// With `close_positions`, requests an orderly close of every open
    /// position and waits (bounded) for the trackers to drain first.
    pub async fn emergency_stop(&self, close_positions: bool) {
        warn!(
            "LoopAgent: EMERGENCY STOP (close_positions={})",
            close_positions
        );
        if close_positions {
            self.deps.monitor.pause_portfolio();
            self.deps.monitor.request_close_all(CloseReason::Manual).await;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
            while self.deps.monitor.active_count().await > 0
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let remaining = self.deps.monitor.active_count().await;
            if remaining > 0 {
                error!(
                    "LoopAgent: Emergency close timed out with {} trackers live",
                    remaining
                );
            }
        }
        self.stop();
    }

    /// Merge a config patch; takes effect on the next PERCEPTION entry.
    pub async fn update_config(&self, patch: ConfigPatch) {
        let mut config = self.config.write().await;
        config.apply(&patch);
        info!("LoopAgent: Configuration patch applied");
    }

    /// Drive the autonomous loop until cancellation, kill switch, or a
    /// fatal invariant violation.
    pub async fn run(&self) {
        info!("LoopAgent: Starting autonomous loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut cycle = CycleState {
            market: None,
            portfolio: None,
            candidate: None,
        };

        let mut state = AgentState::Idle;
        loop {
            *self.state.write().await = state;
            if state == AgentState::Stopped {
                break;
            }
            if *shutdown_rx.borrow() {
                info!("LoopAgent: Cancellation observed; stopping");
                break;
            }

            let event = match state {
                AgentState::Idle => self.idle_phase(&mut shutdown_rx).await,
                AgentState::Learning => self.learning_phase().await,
                AgentState::Perception => self.perception_phase(&mut cycle).await,
                AgentState::Reasoning => self.reasoning_phase(&mut cycle).await,
                AgentState::RiskCheck => self.risk_check_phase(&mut cycle).await,
                AgentState::Execution => self.execution_phase(&mut cycle).await,
                AgentState::Stopped => break,
            };

            let Some(event) = event else {
                // Cancellation surfaced inside a phase
                break;
            };

            let next = next_state(state, event).unwrap_or(AgentState::Stopped);
            let decision_id = cycle
                .candidate
                .as_ref()
                .map(|d| d.id.to_string())
                .unwrap_or_else(|| "-".to_string());
            info!(
                "LoopAgent: {} --{}--> {} (decision {})",
                state, event, next, decision_id
            );
            if next == AgentState::Idle {
                self.deps
                    .metrics
                    .cycles_total
                    .with_label_values(&[&event.to_string()])
                    .inc();
                cycle.market = None;
                cycle.candidate = None;
            }
            state = next;
        }

        *self.state.write().await = AgentState::Stopped;
        info!("LoopAgent: Loop terminated");
    }

    /// IDLE: wait out the analysis interval, watching for alerts and
    /// cancellation.
    async fn idle_phase(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Option<AgentEvent> {
        let delay = {
            let config = self.config.read().await;
            Duration::from_secs(config.agent.analysis_frequency_secs)
        };

        let mut alert_rx = self.alert_rx.lock().await;
        tokio::select! {
            _ = tokio::time::sleep(delay) => Some(AgentEvent::IntervalElapsed),
            maybe_alert = alert_rx.recv() => {
                if let Some(alert) = maybe_alert {
                    self.note_alert(alert).await;
                }
                Some(AgentEvent::IntervalElapsed)
            }
            _ = shutdown_rx.changed() => None,
        }
    }

    /// LEARNING: outcome feedback is pushed by the sink; this phase logs the
    /// adapted weights so every cycle starts from a known state.
    async fn learning_phase(&self) -> Option<AgentEvent> {
        let memory = self.deps.memory.lock().await;
        let weights = memory.weights();
        info!(
            "LoopAgent: Learning pass complete ({} outcomes, weights {:?})",
            memory.outcomes_recorded(),
            weights
        );
        Some(AgentEvent::OutcomesProcessed)
    }

    /// PERCEPTION: refresh the portfolio, enforce the agent-level kill
    /// switch, and build a fresh market context for the next asset.
    async fn perception_phase(&self, cycle: &mut CycleState) -> Option<AgentEvent> {
        self.rollover_daily_counter().await;
        self.drain_alerts().await;

        if let Some(reason) = self.kill_reason.lock().await.take() {
            error!("LoopAgent: Stopping ({})", reason);
            return Some(AgentEvent::KillSwitchTriggered);
        }

        let (kill_switch_loss_pct, assets) = {
            let config = self.config.read().await;
            (
                config.agent.kill_switch_loss_pct,
                config.agent.asset_pairs.clone(),
            )
        };

        let portfolio = match self.refresh_portfolio().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("LoopAgent: Portfolio refresh failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Some(AgentEvent::TransientFault);
            }
        };

        // Strict gate: equality triggers the kill switch.
        let fraction = portfolio.pnl_fraction();
        if fraction <= -kill_switch_loss_pct / 100.0 {
            error!(
                "LoopAgent: KILL SWITCH - portfolio P&L {:.2}% at stop {:.2}%",
                fraction * 100.0,
                kill_switch_loss_pct
            );
            self.deps.metrics.kill_switch_total.inc();
            self.deps.monitor.pause_portfolio();
            self.deps
                .monitor
                .request_close_all(CloseReason::PortfolioKillSwitch)
                .await;
            return Some(AgentEvent::KillSwitchTriggered);
        }

        self.deps.monitor.set_nav(portfolio.nav()).await;

        // Round-robin over the configured assets, skipping stale data.
        for _ in 0..assets.len() {
            let index = self.asset_cursor.fetch_add(1, Ordering::SeqCst) % assets.len();
            let asset = &assets[index];
            match self.deps.context_provider.market_context(asset).await {
                Ok(ctx) => {
                    if !ctx.is_fresh(Utc::now()) {
                        warn!(
                            "LoopAgent: Skipping {} - market data {}s old",
                            asset,
                            ctx.age(Utc::now()).num_seconds()
                        );
                        continue;
                    }
                    cycle.market = Some(ctx);
                    cycle.portfolio = Some(portfolio);
                    return Some(AgentEvent::MarketOk);
                }
                Err(e) => {
                    warn!("LoopAgent: Context build failed for {}: {}", asset, e);
                }
            }
        }

        info!("LoopAgent: No asset with fresh data this cycle");
        Some(AgentEvent::NoActionableSignal)
    }

    /// REASONING: gates, then the ensemble, with bounded retries on
    /// insufficient quorum.
    async fn reasoning_phase(&self, cycle: &mut CycleState) -> Option<AgentEvent> {
        let Some(market) = cycle.market.clone() else {
            return Some(AgentEvent::NoActionableSignal);
        };
        let Some(portfolio) = cycle.portfolio.clone() else {
            return Some(AgentEvent::NoActionableSignal);
        };

        let (max_daily_trades, min_confidence, max_retries, size_fraction, policy, approval_timeout) = {
            let config = self.config.read().await;
            (
                config.agent.max_daily_trades,
                config.agent.min_confidence_threshold,
                config.agent.max_retries,
                config.agent.position_size_fraction,
                config.agent.approval_policy,
                Duration::from_secs(config.agent.approval_timeout_secs),
            )
        };

        {
            let daily = self.daily.lock().await;
            if daily.trades >= max_daily_trades {
                info!(
                    "LoopAgent: Daily trade cap reached ({}/{})",
                    daily.trades, max_daily_trades
                );
                return Some(AgentEvent::NoActionableSignal);
            }
        }

        let (weights, regime_params) = {
            let memory = self.deps.memory.lock().await;
            (memory.weights(), memory.regime_params(market.regime))
        };

        let (sl_pct, tp_pct) = {
            let config = self.config.read().await;
            (
                config.monitor.per_trade_stop_loss_pct,
                config.monitor.per_trade_take_profit_pct,
            )
        };

        let size_multiplier = regime_params
            .as_ref()
            .map(|p| p.size_multiplier)
            .unwrap_or(1.0);
        let defaults = DecisionDefaults {
            suggested_size: suggested_size(
                portfolio.nav(),
                market.last_price,
                size_fraction * size_multiplier,
            ),
            stop_loss_pct: sl_pct,
            take_profit_pct: tp_pct,
        };

        // Transient provider failures retry with exponential backoff.
        let mut decision = self
            .deps
            .aggregator
            .decide(market.clone(), portfolio.clone(), &weights, &defaults)
            .await;
        let mut attempt = 0u32;
        while decision.ensemble.quorum == crate::domain::decision::QuorumStatus::Insufficient
            && attempt < max_retries
        {
            attempt += 1;
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt.min(6)));
            warn!(
                "LoopAgent: Insufficient quorum; retry {}/{} in {:?}",
                attempt, max_retries, backoff
            );
            tokio::time::sleep(backoff).await;
            decision = self
                .deps
                .aggregator
                .decide(market.clone(), portfolio.clone(), &weights, &defaults)
                .await;
        }

        let effective_min_confidence = regime_params
            .map(|p| p.min_confidence.max(min_confidence))
            .unwrap_or(min_confidence);

        if decision.action == TradeAction::Hold || decision.confidence < effective_min_confidence {
            info!(
                "LoopAgent: No actionable signal for {} ({} at {:.0} < {:.0})",
                decision.asset, decision.action, decision.confidence, effective_min_confidence
            );
            self.save_decision(&decision).await;
            return Some(AgentEvent::NoActionableSignal);
        }

        // Approval gate, fail-closed on timeout.
        if self.needs_approval(policy, &decision.asset).await {
            let approved = match tokio::time::timeout(
                approval_timeout,
                self.deps.approval.request_approval(&decision),
            )
            .await
            {
                Ok(Ok(approved)) => approved,
                Ok(Err(e)) => {
                    warn!("LoopAgent: Approval channel failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!("LoopAgent: Approval timed out for {}", decision.asset);
                    false
                }
            };
            if !approved {
                let mut denied = decision;
                denied.approved = Some(false);
                denied.rejection_reason = Some("approval_denied".to_string());
                self.save_decision(&denied).await;
                return Some(AgentEvent::NoActionableSignal);
            }
        }

        cycle.candidate = Some(decision);
        Some(AgentEvent::ActionableSignal)
    }

    /// RISK_CHECK: build a fresh risk context, run the gatekeeper, persist
    /// the verdict on the decision.
    async fn risk_check_phase(&self, cycle: &mut CycleState) -> Option<AgentEvent> {
        let (Some(market), Some(portfolio), Some(mut decision)) = (
            cycle.market.clone(),
            cycle.portfolio.clone(),
            cycle.candidate.take(),
        ) else {
            return Some(AgentEvent::Rejected);
        };

        let mut assets: Vec<AssetPair> = portfolio.positions.iter().map(|p| p.asset.clone()).collect();
        assets.push(market.asset.clone());
        let correlations =
            correlation_matrix(&self.deps.market_data, &assets, Timeframe::H1, 50).await;

        let ctx = RiskContext {
            snapshot: portfolio,
            correlations,
            market_age: market.age(Utc::now()),
            asset_class: market.asset_class,
            regime: market.regime,
            realized_volatility: market.realized_volatility,
            last_price: market.last_price,
        };

        let verdict = self.deps.gatekeeper.validate(&decision, &ctx).await;
        decision.approved = Some(verdict.approved);
        decision.rejection_reason = verdict.reason;
        self.save_decision(&decision).await;

        let approved = verdict.approved;
        cycle.candidate = Some(decision);
        if approved {
            Some(AgentEvent::Approved)
        } else {
            Some(AgentEvent::Rejected)
        }
    }

    /// EXECUTION: one platform call through the breaker, tracker attach on
    /// success.
    async fn execution_phase(&self, cycle: &mut CycleState) -> Option<AgentEvent> {
        let Some(decision) = cycle.candidate.clone() else {
            return Some(AgentEvent::ExecutionFailed);
        };

        match self.deps.sink.execute_decision(&decision).await {
            Ok(position) => {
                let max_daily = self.config.read().await.agent.max_daily_trades;
                let mut daily = self.daily.lock().await;
                daily.trades += 1;
                info!(
                    "LoopAgent: Executed decision {} -> position {} ({}/{} today)",
                    decision.id, position.id, daily.trades, max_daily
                );
                Some(AgentEvent::ExecutionSucceeded)
            }
            Err(e) if e.is_fatal() => {
                error!("LoopAgent: Fatal execution error: {}", e);
                *self.kill_reason.lock().await = Some(format!("fatal execution error: {}", e));
                Some(AgentEvent::ExecutionFailed)
            }
            Err(e) => {
                warn!("LoopAgent: Execution failed for {}: {}", decision.id, e);
                Some(AgentEvent::ExecutionFailed)
            }
        }
    }

    async fn refresh_portfolio(&self) -> Result<PortfolioSnapshot, EngineError> {
        let balances = self
            .deps
            .breaker
            .call(self.deps.platform.balances())
            .await?;
        let positions = self
            .deps
            .breaker
            .call(self.deps.platform.open_positions())
            .await?;
        let realized_today = self.deps.monitor.snapshot().await.realized_pnl_today;

        Ok(PortfolioSnapshot {
            balances,
            positions,
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            realized_pnl_today: realized_today,
            captured_at: Utc::now(),
        })
    }

    async fn needs_approval(&self, policy: ApprovalPolicy, asset: &AssetPair) -> bool {
        match policy {
            ApprovalPolicy::Never => false,
            ApprovalPolicy::Always => true,
            ApprovalPolicy::OnNewAsset => {
                let filter = DecisionFilter {
                    asset: Some(asset.clone()),
                    approved: Some(true),
                    ..Default::default()
                };
                match self.deps.store.list(&filter, 1).await {
                    Ok(previous) => previous.is_empty(),
                    Err(e) => {
                        warn!("LoopAgent: Approval history lookup failed: {}", e);
                        true
                    }
                }
            }
        }
    }

    async fn save_decision(&self, decision: &Decision) {
        if let Err(e) = self.deps.store.save(decision).await {
            error!("LoopAgent: Failed to persist decision {}: {}", decision.id, e);
        }
    }

    async fn rollover_daily_counter(&self) {
        let today = Utc::now().date_naive();
        let mut daily = self.daily.lock().await;
        if daily.date != today {
            info!(
                "LoopAgent: Daily rollover {} -> {} (resetting trade count from {})",
                daily.date, today, daily.trades
            );
            daily.date = today;
            daily.trades = 0;
        }
    }

    async fn drain_alerts(&self) {
        let mut alert_rx = self.alert_rx.lock().await;
        while let Ok(alert) = alert_rx.try_recv() {
            self.note_alert(alert).await;
        }
    }

    async fn note_alert(&self, alert: MonitorAlert) {
        match alert {
            MonitorAlert::KillSwitch { pnl_fraction } => {
                *self.kill_reason.lock().await = Some(format!(
                    "portfolio kill switch at {:.2}%",
                    pnl_fraction * 100.0
                ));
            }
            MonitorAlert::CloseEscalation { position_id, error } => {
                *self.kill_reason.lock().await = Some(format!(
                    "close escalation for {} requires manual intervention: {}",
                    position_id, error
                ));
            }
        }
    }
}

fn suggested_size(nav: Decimal, price: Decimal, fraction: f64) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let fraction = Decimal::from_f64(fraction.max(0.0)).unwrap_or(Decimal::ZERO);
    (nav * fraction / price).round_dp(8)
}
