//! Risk gatekeeper and breaker configuration parsing from environment
//! variables.

use crate::domain::risk::CorrelationMode;
use anyhow::Result;
use std::env;

/// Risk management environment configuration
#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    // Drawdown & VaR
    pub max_drawdown_pct: f64,
    pub max_var_pct: f64,

    // Correlation
    pub intra_correlation_threshold: f64,
    pub intra_correlation_mode: CorrelationMode,
    pub cross_correlation_threshold: f64,
    pub cross_correlation_mode: CorrelationMode,
    /// Correlated-asset count at or above which the check trips
    pub max_correlated_count: usize,

    // Concentration & leverage
    pub max_position_fraction: f64,
    pub max_leverage: f64,

    // Volatility vs confidence
    pub high_vol_threshold: f64,
    pub high_vol_min_confidence: f64,

    // Circuit breaker tuning
    pub breaker_failure_threshold: usize,
    pub breaker_recovery_timeout_secs: u64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        let intra_correlation_mode = env::var("INTRA_CORRELATION_MODE")
            .unwrap_or_else(|_| "block".to_string())
            .parse::<CorrelationMode>()?;
        let cross_correlation_mode = env::var("CROSS_CORRELATION_MODE")
            .unwrap_or_else(|_| "warn".to_string())
            .parse::<CorrelationMode>()?;

        Ok(Self {
            max_drawdown_pct: super::parse_f64("MAX_DRAWDOWN_PCT", 15.0)?,
            max_var_pct: super::parse_f64("MAX_VAR_PCT", 5.0)?,
            intra_correlation_threshold: super::parse_f64("INTRA_CORRELATION_THRESHOLD", 0.85)?,
            intra_correlation_mode,
            cross_correlation_threshold: super::parse_f64("CROSS_CORRELATION_THRESHOLD", 0.9)?,
            cross_correlation_mode,
            max_correlated_count: super::parse_u64("MAX_CORRELATED_COUNT", 3)? as usize,
            max_position_fraction: super::parse_f64("MAX_POSITION_FRACTION", 0.1)?,
            max_leverage: super::parse_f64("MAX_LEVERAGE", 3.0)?,
            high_vol_threshold: super::parse_f64("HIGH_VOL_THRESHOLD", 0.05)?,
            high_vol_min_confidence: super::parse_f64("HIGH_VOL_MIN_CONFIDENCE", 75.0)?,
            breaker_failure_threshold: super::parse_u64("BREAKER_FAILURE_THRESHOLD", 5)? as usize,
            breaker_recovery_timeout_secs: super::parse_u64("BREAKER_RECOVERY_TIMEOUT_SECS", 60)?,
        })
    }
}

impl Default for RiskEnvConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 15.0,
            max_var_pct: 5.0,
            intra_correlation_threshold: 0.85,
            intra_correlation_mode: CorrelationMode::Block,
            cross_correlation_threshold: 0.9,
            cross_correlation_mode: CorrelationMode::Warn,
            max_correlated_count: 3,
            max_position_fraction: 0.1,
            max_leverage: 3.0,
            high_vol_threshold: 0.05,
            high_vol_min_confidence: 75.0,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout_secs: 60,
        }
    }
}
