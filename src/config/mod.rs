//! Configuration module for Sagetrade.
//!
//! Structured configuration loading from environment variables, organized by
//! domain: Agent, Ensemble, Risk, and Monitor.

mod agent_env_config;
mod ensemble_env_config;
mod monitor_env_config;
mod risk_env_config;

pub use agent_env_config::{AgentEnvConfig, ApprovalPolicy};
pub use ensemble_env_config::{DebateRolesConfig, EnsembleEnvConfig, EnsembleStrategyKind};
pub use monitor_env_config::MonitorEnvConfig;
pub use risk_env_config::RiskEnvConfig;

use anyhow::{Context, Result};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentEnvConfig,
    pub ensemble: EnsembleEnvConfig,
    pub risk: RiskEnvConfig,
    pub monitor: MonitorEnvConfig,

    /// Directory of per-decision JSON records
    pub decisions_dir: String,
    /// JSON-lines journal of outcomes and weight snapshots
    pub memory_path: String,
    /// EMA learning rate for provider accuracy
    pub learning_rate: f64,
    /// Outcomes required before regime parameters adapt
    pub min_samples_per_regime: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            agent: AgentEnvConfig::from_env()?,
            ensemble: EnsembleEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            monitor: MonitorEnvConfig::from_env()?,
            decisions_dir: env::var("DECISIONS_DIR")
                .unwrap_or_else(|_| "data/decisions".to_string()),
            memory_path: env::var("MEMORY_PATH")
                .unwrap_or_else(|_| "data/memory.jsonl".to_string()),
            learning_rate: parse_f64("MEMORY_LEARNING_RATE", 0.2)?,
            min_samples_per_regime: parse_u64("MIN_SAMPLES_PER_REGIME", 20)?,
        })
    }

    /// Merge a runtime patch. Unset fields keep their current values.
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(v) = patch.analysis_frequency_secs {
            self.agent.analysis_frequency_secs = v;
        }
        if let Some(v) = patch.min_confidence_threshold {
            self.agent.min_confidence_threshold = v;
        }
        if let Some(v) = patch.max_daily_trades {
            self.agent.max_daily_trades = v;
        }
        if let Some(v) = patch.kill_switch_loss_pct {
            self.agent.kill_switch_loss_pct = v;
        }
        if let Some(v) = patch.per_trade_stop_loss_pct {
            self.monitor.per_trade_stop_loss_pct = v;
        }
        if let Some(v) = patch.per_trade_take_profit_pct {
            self.monitor.per_trade_take_profit_pct = v;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentEnvConfig::default(),
            ensemble: EnsembleEnvConfig::default(),
            risk: RiskEnvConfig::default(),
            monitor: MonitorEnvConfig::default(),
            decisions_dir: "data/decisions".to_string(),
            memory_path: "data/memory.jsonl".to_string(),
            learning_rate: 0.2,
            min_samples_per_regime: 20,
        }
    }
}

/// Partial configuration update applied under a lock; takes effect on the
/// next PERCEPTION entry.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub analysis_frequency_secs: Option<u64>,
    pub min_confidence_threshold: Option<f64>,
    pub max_daily_trades: Option<u32>,
    pub kill_switch_loss_pct: Option<f64>,
    pub per_trade_stop_loss_pct: Option<f64>,
    pub per_trade_take_profit_pct: Option<f64>,
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut config = Config::default();
        let before_trades = config.agent.max_daily_trades;

        config.apply(&ConfigPatch {
            min_confidence_threshold: Some(70.0),
            ..Default::default()
        });

        assert_eq!(config.agent.min_confidence_threshold, 70.0);
        assert_eq!(config.agent.max_daily_trades, before_trades);
    }
}
