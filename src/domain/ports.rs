use crate::domain::asset::AssetPair;
use crate::domain::decision::{Decision, DecisionContext, ProviderDecision};
use crate::domain::errors::EngineError;
use crate::domain::market::{Candle, MarketContext, Timeframe};
use crate::domain::portfolio::{Position, PositionSide};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

// Need async_trait for async functions in traits
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Providers are opaque and side-effect-free from the aggregator's
    /// viewpoint; they must be safe to invoke concurrently.
    async fn decide(&self, ctx: &DecisionContext) -> Result<ProviderDecision, EngineError>;
}

/// Order sent to the platform. `client_id` carries the decision id so
/// replays are idempotent on the platform side.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_id: uuid::Uuid,
    pub asset: AssetPair,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReceipt {
    pub position_id: String,
    pub filled_price: Decimal,
    pub fees: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseReceipt {
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
}

#[async_trait]
pub trait TradingPlatform: Send + Sync {
    fn name(&self) -> &str;

    async fn balances(&self) -> Result<HashMap<String, Decimal>, EngineError>;

    async fn open_positions(&self) -> Result<Vec<Position>, EngineError>;

    /// Must be idempotent under the order's client id.
    async fn execute(&self, order: OrderRequest) -> Result<ExecutionReceipt, EngineError>;

    async fn close_position(&self, position_id: &str) -> Result<CloseReceipt, EngineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum spacing between price fetches the provider tolerates.
    fn rate_limit_hint(&self) -> Duration {
        Duration::from_millis(200)
    }

    async fn candles(
        &self,
        asset: &AssetPair,
        timeframe: Timeframe,
        window: usize,
    ) -> Result<Vec<Candle>, EngineError>;

    async fn price(&self, asset: &AssetPair) -> Result<PricePoint, EngineError>;
}

/// Assembles the full per-asset decision context. Must obey a deadline.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn market_context(&self, asset: &AssetPair) -> Result<MarketContext, EngineError>;
}

/// External approval surface for the `on_new_asset`/`always` policies.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, decision: &Decision) -> Result<bool, EngineError>;
}

/// Approves everything; the default channel when no human gate is wired.
pub struct AutoApprove;

#[async_trait]
impl ApprovalChannel for AutoApprove {
    async fn request_approval(&self, _decision: &Decision) -> Result<bool, EngineError> {
        Ok(true)
    }
}
