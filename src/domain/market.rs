use crate::domain::asset::{AssetClass, AssetPair};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            _ => anyhow::bail!("Unknown timeframe: {}", s),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Indicator values computed over one timeframe's candle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub rsi: f64,
    pub atr: f64,
    /// Standard deviation of close-to-close returns over the window.
    pub realized_volatility: f64,
}

/// Volatility regime classification used to select parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Trending,
    Ranging,
    HighVolatility,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityRegime::Trending => write!(f, "trending"),
            VolatilityRegime::Ranging => write!(f, "ranging"),
            VolatilityRegime::HighVolatility => write!(f, "high_volatility"),
        }
    }
}

impl VolatilityRegime {
    /// Band the regime from realized volatility and trend strength.
    ///
    /// `trend_strength` is the relative distance between fast and slow SMA.
    pub fn classify(realized_volatility: f64, trend_strength: f64, high_vol_threshold: f64) -> Self {
        if realized_volatility > high_vol_threshold {
            VolatilityRegime::HighVolatility
        } else if trend_strength.abs() > 0.005 {
            VolatilityRegime::Trending
        } else {
            VolatilityRegime::Ranging
        }
    }
}

/// Dated snapshot of one asset's market state, built once per decision cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub asset: AssetPair,
    pub asset_class: AssetClass,
    pub last_price: Decimal,
    pub candles: HashMap<Timeframe, Vec<Candle>>,
    pub indicators: HashMap<Timeframe, IndicatorBundle>,
    pub regime: VolatilityRegime,
    /// Dominant-timeframe realized volatility, duplicated out of the bundle
    /// for risk checks that do not care about timeframes.
    pub realized_volatility: f64,
    pub captured_at: DateTime<Utc>,
    pub source: String,
}

impl MarketContext {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.captured_at
    }

    /// Freshness gate: `age <= max_staleness(asset_class)`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now) <= self.asset_class.max_staleness()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn context_aged(minutes: i64) -> MarketContext {
        MarketContext {
            asset: AssetPair::new("BTC/USD").unwrap(),
            asset_class: AssetClass::Crypto,
            last_price: dec!(50000),
            candles: HashMap::new(),
            indicators: HashMap::new(),
            regime: VolatilityRegime::Ranging,
            realized_volatility: 0.01,
            captured_at: Utc::now() - Duration::minutes(minutes),
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        assert!(context_aged(14).is_fresh(now));
        assert!(!context_aged(20).is_fresh(now));
    }

    #[test]
    fn test_regime_classification() {
        assert_eq!(
            VolatilityRegime::classify(0.08, 0.0, 0.05),
            VolatilityRegime::HighVolatility
        );
        assert_eq!(
            VolatilityRegime::classify(0.01, 0.02, 0.05),
            VolatilityRegime::Trending
        );
        assert_eq!(
            VolatilityRegime::classify(0.01, 0.001, 0.05),
            VolatilityRegime::Ranging
        );
    }
}
