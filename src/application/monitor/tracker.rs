//! Per-position tracker task: marks the position on an interval, enforces
//! per-trade stop-loss / take-profit, and closes defensively when the price
//! feed dies.

use crate::domain::asset::AssetPair;
use crate::domain::decision::CloseReason;
use crate::domain::portfolio::{Position, PositionSide};
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::rate_limiter::IntervalLimiter;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Close request emitted toward the execution sink; the tracker never calls
/// the platform itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub position_id: String,
    pub reason: CloseReason,
}

/// Live record of one tracked position. Mutated only by the owning tracker
/// task; everyone else sees cloned snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerState {
    pub position_id: String,
    pub decision_id: Uuid,
    pub asset: AssetPair,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub last_mark_price: Decimal,
    pub last_mark_time: DateTime<Utc>,
    pub pnl: Decimal,
    /// Set once a close has been requested; the tracker stays attached
    /// until the close confirms.
    pub close_requested: Option<CloseReason>,
}

impl TrackerState {
    pub fn from_position(
        position: &Position,
        decision_id: Uuid,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Self {
        let sl = Decimal::from_f64(stop_loss_pct / 100.0).unwrap_or(Decimal::ZERO);
        let tp = Decimal::from_f64(take_profit_pct / 100.0).unwrap_or(Decimal::ZERO);
        let (stop_loss_price, take_profit_price) = match position.side {
            PositionSide::Long => (
                position.entry_price * (Decimal::ONE - sl),
                position.entry_price * (Decimal::ONE + tp),
            ),
            PositionSide::Short => (
                position.entry_price * (Decimal::ONE + sl),
                position.entry_price * (Decimal::ONE - tp),
            ),
        };

        Self {
            position_id: position.id.clone(),
            decision_id,
            asset: position.asset.clone(),
            side: position.side,
            entry_price: position.entry_price,
            quantity: position.quantity,
            entry_time: position.entry_time,
            stop_loss_pct,
            take_profit_pct,
            stop_loss_price,
            take_profit_price,
            last_mark_price: position.mark_price,
            last_mark_time: Utc::now(),
            pnl: Decimal::ZERO,
            close_requested: None,
        }
    }

    pub fn update_mark(&mut self, price: Decimal, time: DateTime<Utc>) {
        self.last_mark_price = price;
        self.last_mark_time = time;
        let delta = price - self.entry_price;
        self.pnl = match self.side {
            PositionSide::Long => delta * self.quantity,
            PositionSide::Short => -delta * self.quantity,
        };
    }

    /// P&L relative to the entry exposure.
    pub fn pnl_fraction(&self) -> f64 {
        let basis = self.entry_price * self.quantity;
        if basis.is_zero() {
            return 0.0;
        }
        (self.pnl / basis).to_f64().unwrap_or(0.0)
    }

    /// SL first, then TP. Both boundaries are inclusive.
    pub fn breached(&self) -> Option<CloseReason> {
        let fraction = self.pnl_fraction();
        if fraction <= -self.stop_loss_pct / 100.0 {
            Some(CloseReason::StopLoss)
        } else if fraction >= self.take_profit_pct / 100.0 {
            Some(CloseReason::TakeProfit)
        } else {
            None
        }
    }
}

pub(super) struct TrackerTask {
    pub state: Arc<RwLock<TrackerState>>,
    pub market: Arc<dyn MarketDataProvider>,
    pub limiter: Arc<IntervalLimiter>,
    pub check_interval: Duration,
    pub max_price_failures: u32,
    pub close_tx: mpsc::Sender<CloseRequest>,
    pub shutdown: watch::Receiver<bool>,
}

impl TrackerTask {
    pub async fn run(mut self) {
        let (position_id, asset) = {
            let state = self.state.read().await;
            (state.position_id.clone(), state.asset.clone())
        };
        info!("Tracker [{}]: Started for position {}", asset, position_id);

        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.limiter.acquire().await;
                    match self.market.price(&asset).await {
                        Ok(point) => {
                            consecutive_failures = 0;
                            self.on_price(&position_id, &asset, point.price).await;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                "Tracker [{}]: Price fetch failed ({}/{}): {}",
                                asset, consecutive_failures, self.max_price_failures, e
                            );
                            if consecutive_failures >= self.max_price_failures {
                                warn!(
                                    "Tracker [{}]: Price feed lost; requesting defensive close",
                                    asset
                                );
                                self.request_close(&position_id, CloseReason::StopLoss).await;
                                consecutive_failures = 0;
                            }
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Tracker [{}]: Shutdown observed", asset);
                        return;
                    }
                }
            }
        }
    }

    async fn on_price(&self, position_id: &str, asset: &AssetPair, price: Decimal) {
        let breach = {
            let mut state = self.state.write().await;
            state.update_mark(price, Utc::now());
            if state.close_requested.is_some() {
                None
            } else {
                state.breached()
            }
        };

        if let Some(reason) = breach {
            info!(
                "Tracker [{}]: {} threshold hit at {} (position {})",
                asset, reason, price, position_id
            );
            self.request_close(position_id, reason).await;
        }
    }

    async fn request_close(&self, position_id: &str, reason: CloseReason) {
        {
            let mut state = self.state.write().await;
            if state.close_requested.is_some() {
                return;
            }
            state.close_requested = Some(reason);
        }
        let request = CloseRequest {
            position_id: position_id.to_string(),
            reason,
        };
        if self.close_tx.send(request).await.is_err() {
            warn!(
                "Tracker [{}]: Close channel dropped; request lost",
                position_id
            );
        }
    }
}
