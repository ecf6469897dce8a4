use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized asset pair identifier.
///
/// Stored uppercase with separators removed, so `btc/usd`, `BTC-USD` and
/// `BTCUSD` all compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPair(String);

impl AssetPair {
    pub fn new(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, '/' | '-' | '_' | ':' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() {
            bail!("Empty asset pair: '{}'", raw);
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("Invalid asset pair: '{}'", raw);
        }

        Ok(Self(normalized))
    }

    pub fn symbol(&self) -> &str {
        &self.0
    }
}

impl FromStr for AssetPair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset class for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Forex,
    Stock,
}

impl AssetClass {
    /// Maximum age a market snapshot may have before it is considered
    /// stale for a live decision.
    pub fn max_staleness(&self) -> Duration {
        match self {
            AssetClass::Crypto => Duration::minutes(15),
            AssetClass::Forex => Duration::minutes(10),
            AssetClass::Stock => Duration::minutes(10),
        }
    }

    /// Whether the venue is open at `now`. Crypto trades 24/7; forex closes
    /// over the weekend; stocks follow regular US hours (UTC).
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match self {
            AssetClass::Crypto => true,
            AssetClass::Forex => !matches!(now.weekday(), Weekday::Sat | Weekday::Sun),
            AssetClass::Stock => {
                let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
                let hour = now.hour();
                weekday && (13..21).contains(&hour)
            }
        }
    }
}

impl FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "forex" => Ok(AssetClass::Forex),
            "stock" => Ok(AssetClass::Stock),
            _ => anyhow::bail!(
                "Invalid ASSET_CLASS: {}. Must be 'crypto', 'forex', or 'stock'",
                s
            ),
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Forex => write!(f, "forex"),
            AssetClass::Stock => write!(f, "stock"),
        }
    }
}
