//! Mock adapters for tests and mock-mode runs.
//!
//! The platform fills instantly at the mock market's current price and is
//! idempotent under the order's client id; failures can be scripted to
//! drive breaker and retry paths.

use crate::domain::asset::AssetPair;
use crate::domain::decision::{DecisionContext, ProviderDecision, TradeAction};
use crate::domain::errors::EngineError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::portfolio::{Position, PositionSide};
use crate::domain::ports::{
    CloseReceipt, DecisionProvider, ExecutionReceipt, MarketDataProvider, OrderRequest, PricePoint,
    TradingPlatform,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct MockMarketData {
    prices: Arc<RwLock<HashMap<String, PricePoint>>>,
    candles: Arc<RwLock<HashMap<String, Vec<Candle>>>>,
    fail_prices: Arc<RwLock<VecDeque<EngineError>>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, asset: &AssetPair, price: Decimal) {
        self.set_price_at(asset, price, Utc::now()).await;
    }

    /// Set a price with an explicit timestamp to simulate stale feeds.
    pub async fn set_price_at(&self, asset: &AssetPair, price: Decimal, timestamp: DateTime<Utc>) {
        self.prices
            .write()
            .await
            .insert(asset.symbol().to_string(), PricePoint { price, timestamp });
    }

    pub async fn set_candles(&self, asset: &AssetPair, candles: Vec<Candle>) {
        self.candles
            .write()
            .await
            .insert(asset.symbol().to_string(), candles);
    }

    pub async fn fail_next_price(&self, error: EngineError) {
        self.fail_prices.write().await.push_back(error);
    }

    /// Synthesize a gently drifting candle window around the current price.
    fn synthesize(price: Decimal, window: usize) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(window);
        let base = price;
        let now = Utc::now().timestamp();
        for i in 0..window {
            let wiggle: f64 = (i as f64 * 0.7).sin() * 0.002;
            let offset = Decimal::from_f64(wiggle).unwrap_or(Decimal::ZERO) * base;
            let close = base + offset;
            candles.push(Candle {
                open: close,
                high: close + base * Decimal::from_f64(0.001).unwrap_or(Decimal::ZERO),
                low: close - base * Decimal::from_f64(0.001).unwrap_or(Decimal::ZERO),
                close,
                volume: Decimal::from(100),
                timestamp: now - ((window - i) as i64) * 60,
            });
        }
        candles
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketData {
    fn name(&self) -> &str {
        "mock"
    }

    fn rate_limit_hint(&self) -> Duration {
        Duration::from_millis(1)
    }

    async fn candles(
        &self,
        asset: &AssetPair,
        _timeframe: Timeframe,
        window: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        if let Some(stored) = self.candles.read().await.get(asset.symbol()) {
            return Ok(stored.clone());
        }
        let price = self.price(asset).await?;
        Ok(Self::synthesize(price.price, window))
    }

    async fn price(&self, asset: &AssetPair) -> Result<PricePoint, EngineError> {
        if let Some(err) = self.fail_prices.write().await.pop_front() {
            return Err(err);
        }
        self.prices
            .read()
            .await
            .get(asset.symbol())
            .cloned()
            .ok_or_else(|| EngineError::permanent(format!("no mock price for {}", asset)))
    }
}

pub struct MockTradingPlatform {
    market: Arc<MockMarketData>,
    balances: RwLock<HashMap<String, Decimal>>,
    positions: RwLock<HashMap<String, Position>>,
    fills: RwLock<HashMap<Uuid, ExecutionReceipt>>,
    fail_executes: RwLock<VecDeque<EngineError>>,
    fail_closes: RwLock<VecDeque<EngineError>>,
    next_position: AtomicU64,
}

impl MockTradingPlatform {
    pub fn new(market: Arc<MockMarketData>, starting_cash: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert("USD".to_string(), starting_cash);
        Self {
            market,
            balances: RwLock::new(balances),
            positions: RwLock::new(HashMap::new()),
            fills: RwLock::new(HashMap::new()),
            fail_executes: RwLock::new(VecDeque::new()),
            fail_closes: RwLock::new(VecDeque::new()),
            next_position: AtomicU64::new(1),
        }
    }

    pub async fn fail_next_execute(&self, error: EngineError) {
        self.fail_executes.write().await.push_back(error);
    }

    pub async fn fail_next_close(&self, error: EngineError) {
        self.fail_closes.write().await.push_back(error);
    }

    pub async fn position_count(&self) -> usize {
        self.positions.read().await.len()
    }
}

#[async_trait]
impl TradingPlatform for MockTradingPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn balances(&self) -> Result<HashMap<String, Decimal>, EngineError> {
        Ok(self.balances.read().await.clone())
    }

    async fn open_positions(&self) -> Result<Vec<Position>, EngineError> {
        let prices = &self.market;
        let mut positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        for position in &mut positions {
            if let Ok(point) = prices.price(&position.asset).await {
                position.mark_price = point.price;
            }
        }
        Ok(positions)
    }

    async fn execute(&self, order: OrderRequest) -> Result<ExecutionReceipt, EngineError> {
        if let Some(err) = self.fail_executes.write().await.pop_front() {
            return Err(err);
        }

        // Idempotency under the client id: a replay returns the same fill.
        if let Some(receipt) = self.fills.read().await.get(&order.client_id) {
            return Ok(receipt.clone());
        }

        let point = self.market.price(&order.asset).await?;
        let n = self.next_position.fetch_add(1, Ordering::SeqCst);
        let receipt = ExecutionReceipt {
            position_id: format!("pos-{}", n),
            filled_price: point.price,
            fees: Decimal::ZERO,
        };

        let position = Position {
            id: receipt.position_id.clone(),
            asset: order.asset.clone(),
            side: order.side,
            entry_price: point.price,
            quantity: order.quantity,
            entry_time: Utc::now(),
            mark_price: point.price,
        };
        self.positions
            .write()
            .await
            .insert(receipt.position_id.clone(), position);
        self.fills
            .write()
            .await
            .insert(order.client_id, receipt.clone());

        info!(
            "MockTradingPlatform: Filled {} {} {} @ {}",
            order.side, order.quantity, order.asset, point.price
        );
        Ok(receipt)
    }

    async fn close_position(&self, position_id: &str) -> Result<CloseReceipt, EngineError> {
        if let Some(err) = self.fail_closes.write().await.pop_front() {
            return Err(err);
        }

        let position = self
            .positions
            .write()
            .await
            .remove(position_id)
            .ok_or_else(|| EngineError::permanent(format!("unknown position {}", position_id)))?;

        let point = self.market.price(&position.asset).await?;
        let delta = point.price - position.entry_price;
        let realized = match position.side {
            PositionSide::Long => delta * position.quantity,
            PositionSide::Short => -delta * position.quantity,
        };

        let mut balances = self.balances.write().await;
        *balances.entry("USD".to_string()).or_insert(Decimal::ZERO) += realized;

        Ok(CloseReceipt {
            exit_price: point.price,
            realized_pnl: realized,
        })
    }
}

pub enum ScriptedReply {
    Decide {
        action: TradeAction,
        confidence: f64,
        reasoning: String,
    },
    Fail(EngineError),
}

/// Decision provider returning scripted replies, then a fixed fallback.
pub struct ScriptedProvider {
    name: String,
    script: tokio::sync::Mutex<VecDeque<ScriptedReply>>,
    fallback: (TradeAction, f64, String),
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(name: &str, action: TradeAction, confidence: f64, reasoning: &str) -> Self {
        Self {
            name: name.to_string(),
            script: tokio::sync::Mutex::new(VecDeque::new()),
            fallback: (action, confidence, reasoning.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push_reply(&self, reply: ScriptedReply) {
        self.script.lock().await.push_back(reply);
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, _ctx: &DecisionContext) -> Result<ProviderDecision, EngineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.script.lock().await.pop_front();
        let (action, confidence, reasoning) = match reply {
            Some(ScriptedReply::Fail(err)) => return Err(err),
            Some(ScriptedReply::Decide {
                action,
                confidence,
                reasoning,
            }) => (action, confidence, reasoning),
            None => self.fallback.clone(),
        };

        Ok(ProviderDecision {
            provider: self.name.clone(),
            action,
            confidence,
            reasoning,
            latency_ms: 0,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_execute_is_idempotent_under_client_id() {
        let market = Arc::new(MockMarketData::new());
        let asset = AssetPair::new("BTC/USD").unwrap();
        market.set_price(&asset, dec!(100)).await;

        let platform = MockTradingPlatform::new(market, dec!(10000));
        let order = OrderRequest {
            client_id: Uuid::new_v4(),
            asset,
            side: PositionSide::Long,
            quantity: dec!(1),
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        };

        let first = platform.execute(order.clone()).await.unwrap();
        let second = platform.execute(order).await.unwrap();

        assert_eq!(first.position_id, second.position_id);
        assert_eq!(platform.position_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_realizes_pnl() {
        let market = Arc::new(MockMarketData::new());
        let asset = AssetPair::new("ETH/USD").unwrap();
        market.set_price(&asset, dec!(100)).await;

        let platform = MockTradingPlatform::new(market.clone(), dec!(1000));
        let receipt = platform
            .execute(OrderRequest {
                client_id: Uuid::new_v4(),
                asset: asset.clone(),
                side: PositionSide::Long,
                quantity: dec!(1),
                stop_loss_pct: 2.0,
                take_profit_pct: 4.0,
            })
            .await
            .unwrap();

        market.set_price(&asset, dec!(105)).await;
        let close = platform.close_position(&receipt.position_id).await.unwrap();

        assert_eq!(close.realized_pnl, dec!(5));
        assert_eq!(platform.balances().await.unwrap()["USD"], dec!(1005));
    }

    #[tokio::test]
    async fn test_scripted_provider_replies_then_falls_back() {
        let provider = ScriptedProvider::new("alpha", TradeAction::Hold, 50.0, "flat");
        provider
            .push_reply(ScriptedReply::Decide {
                action: TradeAction::Buy,
                confidence: 80.0,
                reasoning: "momentum".to_string(),
            })
            .await;

        let market = MockMarketData::new();
        let asset = AssetPair::new("BTC/USD").unwrap();
        market.set_price(&asset, dec!(100)).await;

        let ctx = DecisionContext::new(
            crate::domain::market::MarketContext {
                asset,
                asset_class: crate::domain::asset::AssetClass::Crypto,
                last_price: dec!(100),
                candles: HashMap::new(),
                indicators: HashMap::new(),
                regime: crate::domain::market::VolatilityRegime::Ranging,
                realized_volatility: 0.01,
                captured_at: Utc::now(),
                source: "mock".to_string(),
            },
            crate::domain::portfolio::PortfolioSnapshot {
                balances: HashMap::new(),
                positions: vec![],
                margin_used: Decimal::ZERO,
                margin_available: Decimal::ZERO,
                realized_pnl_today: Decimal::ZERO,
                captured_at: Utc::now(),
            },
        );

        let first = provider.decide(&ctx).await.unwrap();
        assert_eq!(first.action, TradeAction::Buy);

        let second = provider.decide(&ctx).await.unwrap();
        assert_eq!(second.action, TradeAction::Hold);
    }
}
