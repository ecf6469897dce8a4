use crate::domain::asset::AssetPair;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// An open position as reported by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub asset: AssetPair,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub mark_price: Decimal,
}

impl Position {
    pub fn unrealized_pnl(&self) -> Decimal {
        let delta = self.mark_price - self.entry_price;
        match self.side {
            PositionSide::Long => delta * self.quantity,
            PositionSide::Short => -delta * self.quantity,
        }
    }

    pub fn exposure(&self) -> Decimal {
        self.mark_price * self.quantity
    }
}

/// Balance and open-position snapshot, rebuilt from the platform each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub balances: HashMap<String, Decimal>,
    pub positions: Vec<Position>,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
    pub realized_pnl_today: Decimal,
    pub captured_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn cash(&self) -> Decimal {
        self.balances.values().copied().sum()
    }

    /// `nav = cash + sum(mark_to_market(position))`
    pub fn nav(&self) -> Decimal {
        self.cash() + self.positions.iter().map(|p| p.unrealized_pnl()).sum::<Decimal>()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.unrealized_pnl()).sum()
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.positions.iter().map(|p| p.exposure()).sum()
    }

    /// Unrealized P&L as a fraction of NAV. Zero NAV yields zero.
    pub fn pnl_fraction(&self) -> f64 {
        let nav = self.nav();
        if nav.is_zero() {
            return 0.0;
        }
        (self.unrealized_pnl() / nav).to_f64().unwrap_or(0.0)
    }

    pub fn holds(&self, asset: &AssetPair) -> bool {
        self.positions.iter().any(|p| &p.asset == asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: PositionSide, entry: Decimal, mark: Decimal, qty: Decimal) -> Position {
        Position {
            id: "p1".to_string(),
            asset: AssetPair::new("ETH/USD").unwrap(),
            side,
            entry_price: entry,
            quantity: qty,
            entry_time: Utc::now(),
            mark_price: mark,
        }
    }

    #[test]
    fn test_long_pnl() {
        let p = position(PositionSide::Long, dec!(100), dec!(105), dec!(2));
        assert_eq!(p.unrealized_pnl(), dec!(10));
    }

    #[test]
    fn test_short_pnl() {
        let p = position(PositionSide::Short, dec!(100), dec!(105), dec!(2));
        assert_eq!(p.unrealized_pnl(), dec!(-10));
    }

    #[test]
    fn test_nav_includes_mark_to_market() {
        let mut balances = HashMap::new();
        balances.insert("USD".to_string(), dec!(1000));
        let snapshot = PortfolioSnapshot {
            balances,
            positions: vec![position(PositionSide::Long, dec!(100), dec!(110), dec!(1))],
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            realized_pnl_today: Decimal::ZERO,
            captured_at: Utc::now(),
        };
        assert_eq!(snapshot.nav(), dec!(1010));
        assert!((snapshot.pnl_fraction() - 10.0 / 1010.0).abs() < 1e-9);
    }
}
