use crate::domain::asset::AssetClass;
use crate::domain::market::VolatilityRegime;
use crate::domain::portfolio::PortfolioSnapshot;
use chrono::Duration;
use std::collections::HashMap;
use std::str::FromStr;

/// Whether a correlation breach blocks the trade or only records a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    Block,
    Warn,
}

impl FromStr for CorrelationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(CorrelationMode::Block),
            "warn" => Ok(CorrelationMode::Warn),
            _ => anyhow::bail!("Invalid correlation mode: {}. Must be 'block' or 'warn'", s),
        }
    }
}

/// Per-decision input to the risk gatekeeper. Built fresh each validation,
/// never cached across cycles.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub snapshot: PortfolioSnapshot,
    /// Pairwise return correlation, keyed by normalized symbol pair.
    pub correlations: HashMap<(String, String), f64>,
    /// Age of the market data backing the decision.
    pub market_age: Duration,
    pub asset_class: AssetClass,
    pub regime: VolatilityRegime,
    /// Realized volatility of the decision's asset.
    pub realized_volatility: f64,
    /// Reference price of the decision's asset, for exposure math.
    pub last_price: rust_decimal::Decimal,
}

impl RiskContext {
    /// Symmetric correlation lookup; missing pairs count as uncorrelated.
    pub fn correlation(&self, a: &str, b: &str) -> f64 {
        self.correlations
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.correlations.get(&(b.to_string(), a.to_string())))
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_correlation_is_symmetric() {
        let mut correlations = HashMap::new();
        correlations.insert(("BTCUSD".to_string(), "ETHUSD".to_string()), 0.9);

        let ctx = RiskContext {
            snapshot: PortfolioSnapshot {
                balances: HashMap::new(),
                positions: vec![],
                margin_used: rust_decimal::Decimal::ZERO,
                margin_available: rust_decimal::Decimal::ZERO,
                realized_pnl_today: rust_decimal::Decimal::ZERO,
                captured_at: Utc::now(),
            },
            correlations,
            market_age: Duration::seconds(5),
            asset_class: AssetClass::Crypto,
            regime: VolatilityRegime::Ranging,
            realized_volatility: 0.01,
            last_price: rust_decimal::Decimal::from(50000),
        };

        assert_eq!(ctx.correlation("BTCUSD", "ETHUSD"), 0.9);
        assert_eq!(ctx.correlation("ETHUSD", "BTCUSD"), 0.9);
        assert_eq!(ctx.correlation("BTCUSD", "SOLUSD"), 0.0);
    }
}
