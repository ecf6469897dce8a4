//! Trade monitor configuration parsing from environment variables.

use anyhow::Result;

/// Trade monitor environment configuration
#[derive(Debug, Clone)]
pub struct MonitorEnvConfig {
    pub per_trade_stop_loss_pct: f64,
    pub per_trade_take_profit_pct: f64,
    pub portfolio_stop_loss_pct: f64,
    pub portfolio_take_profit_pct: f64,
    /// Hard cap on parallel position trackers
    pub max_concurrent_trackers: usize,
    pub pnl_check_interval_secs: u64,
    pub portfolio_check_interval_secs: u64,
    /// Consecutive price-fetch failures before a defensive close
    pub max_price_failures: u32,
    /// Close retries before escalating to the agent
    pub close_retry_limit: u32,
}

impl MonitorEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            per_trade_stop_loss_pct: super::parse_f64("PER_TRADE_STOP_LOSS_PCT", 2.0)?,
            per_trade_take_profit_pct: super::parse_f64("PER_TRADE_TAKE_PROFIT_PCT", 4.0)?,
            portfolio_stop_loss_pct: super::parse_f64("PORTFOLIO_STOP_LOSS_PCT", 5.0)?,
            portfolio_take_profit_pct: super::parse_f64("PORTFOLIO_TAKE_PROFIT_PCT", 10.0)?,
            max_concurrent_trackers: super::parse_u64("MAX_CONCURRENT_TRACKERS", 10)? as usize,
            pnl_check_interval_secs: super::parse_u64("PNL_CHECK_INTERVAL_SECS", 10)?,
            portfolio_check_interval_secs: super::parse_u64("PORTFOLIO_CHECK_INTERVAL_SECS", 30)?,
            max_price_failures: super::parse_u64("MAX_PRICE_FAILURES", 5)? as u32,
            close_retry_limit: super::parse_u64("CLOSE_RETRY_LIMIT", 3)? as u32,
        })
    }
}

impl Default for MonitorEnvConfig {
    fn default() -> Self {
        Self {
            per_trade_stop_loss_pct: 2.0,
            per_trade_take_profit_pct: 4.0,
            portfolio_stop_loss_pct: 5.0,
            portfolio_take_profit_pct: 10.0,
            max_concurrent_trackers: 10,
            pnl_check_interval_secs: 10,
            portfolio_check_interval_secs: 30,
            max_price_failures: 5,
            close_retry_limit: 3,
        }
    }
}
