//! Assembles per-asset market contexts from the market-data provider:
//! candle windows, indicator bundles, realized volatility and regime.

use crate::domain::asset::{AssetClass, AssetPair};
use crate::domain::errors::EngineError;
use crate::domain::market::{Candle, IndicatorBundle, MarketContext, Timeframe, VolatilityRegime};
use crate::domain::ports::{ContextProvider, MarketDataProvider};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SMA_FAST: usize = 10;
const SMA_SLOW: usize = 30;
const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;

pub struct ContextBuilder {
    market_data: Arc<dyn MarketDataProvider>,
    asset_class: AssetClass,
    timeframes: Vec<Timeframe>,
    window: usize,
    high_vol_threshold: f64,
    deadline: Duration,
}

impl ContextBuilder {
    pub fn new(
        market_data: Arc<dyn MarketDataProvider>,
        asset_class: AssetClass,
        high_vol_threshold: f64,
    ) -> Self {
        Self {
            market_data,
            asset_class,
            timeframes: vec![Timeframe::M5, Timeframe::H1],
            window: 50,
            high_vol_threshold,
            deadline: Duration::from_secs(10),
        }
    }

    pub fn with_timeframes(mut self, timeframes: Vec<Timeframe>) -> Self {
        self.timeframes = timeframes;
        self
    }

    async fn build(&self, asset: &AssetPair) -> Result<MarketContext, EngineError> {
        let point = self.market_data.price(asset).await?;

        let mut candles = HashMap::new();
        let mut indicators = HashMap::new();
        for timeframe in &self.timeframes {
            let window = self
                .market_data
                .candles(asset, *timeframe, self.window)
                .await?;
            if let Some(bundle) = compute_indicators(&window) {
                indicators.insert(*timeframe, bundle);
            }
            candles.insert(*timeframe, window);
        }

        // The first configured timeframe dominates regime classification.
        let (realized_volatility, trend_strength) = self
            .timeframes
            .first()
            .and_then(|tf| indicators.get(tf))
            .map(|b| {
                let trend = if b.sma_slow.abs() > f64::EPSILON {
                    (b.sma_fast - b.sma_slow) / b.sma_slow
                } else {
                    0.0
                };
                (b.realized_volatility, trend)
            })
            .unwrap_or((0.0, 0.0));

        let regime =
            VolatilityRegime::classify(realized_volatility, trend_strength, self.high_vol_threshold);

        Ok(MarketContext {
            asset: asset.clone(),
            asset_class: self.asset_class,
            last_price: point.price,
            candles,
            indicators,
            regime,
            realized_volatility,
            captured_at: point.timestamp,
            source: self.market_data.name().to_string(),
        })
    }
}

#[async_trait]
impl ContextProvider for ContextBuilder {
    async fn market_context(&self, asset: &AssetPair) -> Result<MarketContext, EngineError> {
        tokio::time::timeout(self.deadline, self.build(asset))
            .await
            .map_err(|_| EngineError::transient(format!("context deadline for {}", asset)))?
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .collect()
}

/// Close-to-close simple returns.
fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0].abs() > f64::EPSILON)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn sma(values: &[f64], period: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let tail = &values[values.len().saturating_sub(period)..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 50.0;
    }
    let tail = &closes[closes.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in tail.windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    if losses <= f64::EPSILON {
        return 100.0;
    }
    let rs = gains / losses;
    100.0 - 100.0 / (1.0 + rs)
}

fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 {
        return 0.0;
    }
    let start = candles.len().saturating_sub(period + 1);
    let tail = &candles[start..];
    let mut ranges = Vec::with_capacity(tail.len());
    for w in tail.windows(2) {
        let high = w[1].high.to_f64().unwrap_or(0.0);
        let low = w[1].low.to_f64().unwrap_or(0.0);
        let prev_close = w[0].close.to_f64().unwrap_or(0.0);
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        ranges.push(tr);
    }
    if ranges.is_empty() {
        return 0.0;
    }
    ranges.iter().sum::<f64>() / ranges.len() as f64
}

fn compute_indicators(candles: &[Candle]) -> Option<IndicatorBundle> {
    if candles.len() < 2 {
        return None;
    }
    let closes = closes(candles);
    let rets = returns(&closes);
    let realized_volatility = if rets.len() > 1 {
        rets.iter().std_dev()
    } else {
        0.0
    };

    Some(IndicatorBundle {
        sma_fast: sma(&closes, SMA_FAST),
        sma_slow: sma(&closes, SMA_SLOW),
        rsi: rsi(&closes, RSI_PERIOD),
        atr: atr(candles, ATR_PERIOD),
        realized_volatility,
    })
}

/// Pairwise Pearson correlation of close-to-close returns over one
/// timeframe; feeds the gatekeeper's correlation layers.
pub async fn correlation_matrix(
    market_data: &Arc<dyn MarketDataProvider>,
    assets: &[AssetPair],
    timeframe: Timeframe,
    window: usize,
) -> HashMap<(String, String), f64> {
    let mut series: HashMap<String, Vec<f64>> = HashMap::new();
    for asset in assets {
        if series.contains_key(asset.symbol()) {
            continue;
        }
        if let Ok(candles) = market_data.candles(asset, timeframe, window).await {
            let rets = returns(&closes(&candles));
            if rets.len() > 1 {
                series.insert(asset.symbol().to_string(), rets);
            }
        }
    }

    let symbols: Vec<String> = series.keys().cloned().collect();
    let mut matrix = HashMap::new();
    for (i, a) in symbols.iter().enumerate() {
        for b in symbols.iter().skip(i + 1) {
            let corr = pearson(&series[a.as_str()], &series[b.as_str()]);
            matrix.insert((a.clone(), b.clone()), corr);
        }
    }
    matrix
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let mean_a = a.iter().mean();
    let mean_b = b.iter().mean();
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockMarketData;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(close: f64, ts: i64) -> Candle {
        let c = Decimal::try_from(close).unwrap();
        Candle {
            open: c,
            high: c + dec!(1),
            low: c - dec!(1),
            close: c,
            volume: dec!(100),
            timestamp: ts,
        }
    }

    #[test]
    fn test_sma_uses_tail() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 2), 4.5);
        assert_eq!(sma(&values, 10), 3.0);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), 100.0);

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&falling, 14) < 1.0);
    }

    #[test]
    fn test_pearson_perfect_correlation() {
        let a = vec![0.01, -0.02, 0.03, -0.01, 0.02];
        let b: Vec<f64> = a.iter().map(|x| x * 2.0).collect();
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);

        let inverse: Vec<f64> = a.iter().map(|x| -x).collect();
        assert!((pearson(&a, &inverse) + 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_context_carries_price_timestamp() {
        let market = Arc::new(MockMarketData::new());
        let asset = AssetPair::new("BTC/USD").unwrap();
        let stale = Utc::now() - ChronoDuration::minutes(20);
        market.set_price_at(&asset, dec!(50000), stale).await;

        let candles: Vec<Candle> = (0..40).map(|i| candle(50000.0 + i as f64, i)).collect();
        market.set_candles(&asset, candles).await;

        let builder = ContextBuilder::new(market, AssetClass::Crypto, 0.05);
        let ctx = builder.market_context(&asset).await.unwrap();

        assert_eq!(ctx.captured_at, stale);
        assert!(!ctx.is_fresh(Utc::now()));
        assert!(ctx.indicators.contains_key(&Timeframe::M5));
    }
}
