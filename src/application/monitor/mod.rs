//! Trade monitor: one tracker task per open position plus a portfolio-level
//! watcher enforcing the kill switch and portfolio take-profit.

pub mod tracker;

use crate::config::MonitorEnvConfig;
use crate::domain::decision::{CloseReason, Decision};
use crate::domain::errors::EngineError;
use crate::domain::portfolio::Position;
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::rate_limiter::IntervalLimiter;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
pub use tracker::{CloseRequest, TrackerState};

/// Signals surfaced to the loop agent.
#[derive(Debug, Clone)]
pub enum MonitorAlert {
    KillSwitch { pnl_fraction: f64 },
    CloseEscalation { position_id: String, error: String },
}

/// Immutable view of all trackers and aggregate P&L.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub trackers: Vec<TrackerState>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl_today: Decimal,
}

struct TrackerHandle {
    state: Arc<RwLock<TrackerState>>,
    task: JoinHandle<()>,
}

pub struct TradeMonitor {
    config: MonitorEnvConfig,
    market: Arc<dyn MarketDataProvider>,
    limiter: Arc<IntervalLimiter>,
    trackers: RwLock<HashMap<String, TrackerHandle>>,
    paused: AtomicBool,
    kill_switch_fired: AtomicBool,
    close_tx: mpsc::Sender<CloseRequest>,
    alert_tx: mpsc::Sender<MonitorAlert>,
    nav: RwLock<Decimal>,
    realized_today: RwLock<Decimal>,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
}

impl TradeMonitor {
    pub fn new(
        config: MonitorEnvConfig,
        market: Arc<dyn MarketDataProvider>,
        close_tx: mpsc::Sender<CloseRequest>,
        alert_tx: mpsc::Sender<MonitorAlert>,
        metrics: Metrics,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let limiter = Arc::new(IntervalLimiter::new(market.rate_limit_hint()));
        Arc::new(Self {
            config,
            market,
            limiter,
            trackers: RwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
            kill_switch_fired: AtomicBool::new(false),
            close_tx,
            alert_tx,
            nav: RwLock::new(Decimal::ZERO),
            realized_today: RwLock::new(Decimal::ZERO),
            metrics,
            shutdown,
        })
    }

    /// Start tracking a newly opened position. Capacity is a hard limit;
    /// exceeding it is a programmer error upstream.
    pub async fn attach(&self, position: &Position, decision: &Decision) -> Result<(), EngineError> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(EngineError::Validation(
                "attachments paused by portfolio stop".to_string(),
            ));
        }

        let mut trackers = self.trackers.write().await;
        if trackers.len() >= self.config.max_concurrent_trackers {
            return Err(EngineError::invariant(format!(
                "tracker capacity {} exceeded",
                self.config.max_concurrent_trackers
            )));
        }
        if trackers.contains_key(&position.id) {
            return Err(EngineError::invariant(format!(
                "position {} already tracked",
                position.id
            )));
        }

        let state = Arc::new(RwLock::new(TrackerState::from_position(
            position,
            decision.id,
            decision.stop_loss_pct,
            decision.take_profit_pct,
        )));

        let task = tokio::spawn(
            tracker::TrackerTask {
                state: Arc::clone(&state),
                market: Arc::clone(&self.market),
                limiter: Arc::clone(&self.limiter),
                check_interval: Duration::from_secs(self.config.pnl_check_interval_secs),
                max_price_failures: self.config.max_price_failures,
                close_tx: self.close_tx.clone(),
                shutdown: self.shutdown.clone(),
            }
            .run(),
        );

        trackers.insert(position.id.clone(), TrackerHandle { state, task });
        self.metrics.trackers_active.set(trackers.len() as f64);
        info!(
            "TradeMonitor: Attached tracker for position {} ({} live)",
            position.id,
            trackers.len()
        );
        Ok(())
    }

    /// Stop tracking without a confirmed close (administrative removal).
    pub async fn detach(&self, position_id: &str, reason: &str) {
        let mut trackers = self.trackers.write().await;
        if let Some(handle) = trackers.remove(position_id) {
            handle.task.abort();
            self.metrics.trackers_active.set(trackers.len() as f64);
            info!(
                "TradeMonitor: Detached tracker for position {} ({})",
                position_id, reason
            );
        }
    }

    /// Remove the tracker after its close confirmed; returns the final state
    /// so the sink can assemble the outcome record.
    pub async fn confirm_close(&self, position_id: &str, realized_pnl: Decimal) -> Option<TrackerState> {
        let handle = self.trackers.write().await.remove(position_id)?;
        handle.task.abort();
        let state = handle.state.read().await.clone();

        let mut realized = self.realized_today.write().await;
        *realized += realized_pnl;

        let remaining = self.trackers.read().await.len();
        self.metrics.trackers_active.set(remaining as f64);
        Some(state)
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        let trackers = self.trackers.read().await;
        let mut states = Vec::with_capacity(trackers.len());
        let mut unrealized = Decimal::ZERO;
        for handle in trackers.values() {
            let state = handle.state.read().await.clone();
            unrealized += state.pnl;
            states.push(state);
        }
        MonitorSnapshot {
            trackers: states,
            unrealized_pnl: unrealized,
            realized_pnl_today: *self.realized_today.read().await,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.trackers.read().await.len()
    }

    pub fn pause_portfolio(&self) {
        self.paused.store(true, Ordering::SeqCst);
        warn!("TradeMonitor: Attachments paused");
    }

    pub fn resume_portfolio(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("TradeMonitor: Attachments resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// The agent refreshes NAV each PERCEPTION so portfolio fractions stay
    /// meaningful between platform polls.
    pub async fn set_nav(&self, nav: Decimal) {
        *self.nav.write().await = nav;
        self.metrics.portfolio_nav.set(nav.to_f64().unwrap_or(0.0));
    }

    /// Request a close for every tracker that has none in flight.
    pub async fn request_close_all(&self, reason: CloseReason) {
        let trackers = self.trackers.read().await;
        for (position_id, handle) in trackers.iter() {
            let mut state = handle.state.write().await;
            if state.close_requested.is_some() {
                continue;
            }
            state.close_requested = Some(reason);
            let request = CloseRequest {
                position_id: position_id.clone(),
                reason,
            };
            if self.close_tx.send(request).await.is_err() {
                error!(
                    "TradeMonitor: Close channel dropped while closing {}",
                    position_id
                );
            }
        }
    }

    pub async fn escalate(&self, position_id: &str, error: String) {
        let _ = self
            .alert_tx
            .send(MonitorAlert::CloseEscalation {
                position_id: position_id.to_string(),
                error,
            })
            .await;
    }

    /// Spawn the portfolio-level loop. Runs until shutdown.
    pub fn spawn_portfolio_watch(self: Arc<Self>) -> JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            let mut shutdown = monitor.shutdown.clone();
            let mut interval = tokio::time::interval(Duration::from_secs(
                monitor.config.portfolio_check_interval_secs,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.portfolio_check().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("TradeMonitor: Portfolio watch shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn portfolio_check(&self) {
        let snapshot = self.snapshot().await;
        let nav = *self.nav.read().await;
        if nav <= Decimal::ZERO || snapshot.trackers.is_empty() {
            return;
        }

        let total = snapshot.unrealized_pnl + snapshot.realized_pnl_today;
        let fraction = (total / nav).to_f64().unwrap_or(0.0);
        self.metrics.portfolio_pnl_fraction.set(fraction);

        // Kill switch is inclusive: exactly at the stop it fires.
        if fraction <= -self.config.portfolio_stop_loss_pct / 100.0 {
            if self.kill_switch_fired.swap(true, Ordering::SeqCst) {
                return;
            }
            error!(
                "TradeMonitor: PORTFOLIO KILL SWITCH at {:.2}% (stop {:.2}%)",
                fraction * 100.0,
                self.config.portfolio_stop_loss_pct
            );
            self.metrics.kill_switch_total.inc();
            self.pause_portfolio();
            self.request_close_all(CloseReason::PortfolioKillSwitch).await;
            let _ = self
                .alert_tx
                .send(MonitorAlert::KillSwitch {
                    pnl_fraction: fraction,
                })
                .await;
        } else if fraction >= self.config.portfolio_take_profit_pct / 100.0 {
            info!(
                "TradeMonitor: Portfolio take-profit at {:.2}%; closing all positions",
                fraction * 100.0
            );
            self.request_close_all(CloseReason::TakeProfit).await;
        }
    }
}
