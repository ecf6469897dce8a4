//! Loop agent configuration parsing from environment variables.

use crate::domain::asset::{AssetClass, AssetPair};
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// When an actionable decision requires external approval before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    Always,
    Never,
    OnNewAsset,
}

impl FromStr for ApprovalPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(ApprovalPolicy::Always),
            "never" => Ok(ApprovalPolicy::Never),
            "on_new_asset" => Ok(ApprovalPolicy::OnNewAsset),
            _ => anyhow::bail!(
                "Invalid APPROVAL_POLICY: {}. Must be 'always', 'never', or 'on_new_asset'",
                s
            ),
        }
    }
}

/// Loop agent environment configuration
#[derive(Debug, Clone)]
pub struct AgentEnvConfig {
    /// Delay between cycles while IDLE, in seconds
    pub analysis_frequency_secs: u64,
    /// Ordered list of assets analyzed per cycle
    pub asset_pairs: Vec<AssetPair>,
    pub asset_class: AssetClass,
    /// Minimum confidence for an action other than HOLD
    pub min_confidence_threshold: f64,
    /// Hard cap per calendar day
    pub max_daily_trades: u32,
    /// Agent-level portfolio stop, percent of NAV (strict; equality triggers)
    pub kill_switch_loss_pct: f64,
    pub approval_policy: ApprovalPolicy,
    pub approval_timeout_secs: u64,
    /// Bounded retries for transient provider errors during REASONING
    pub max_retries: u32,
    /// Fraction of NAV committed per trade
    pub position_size_fraction: f64,
}

impl AgentEnvConfig {
    pub fn from_env() -> Result<Self> {
        let asset_pairs = env::var("ASSET_PAIRS")
            .unwrap_or_else(|_| "BTC/USD".to_string())
            .split(',')
            .map(|s| AssetPair::new(s.trim()))
            .collect::<Result<Vec<_>>>()
            .context("Failed to parse ASSET_PAIRS")?;

        let asset_class = env::var("ASSET_CLASS")
            .unwrap_or_else(|_| "crypto".to_string())
            .parse::<AssetClass>()?;

        let approval_policy = env::var("APPROVAL_POLICY")
            .unwrap_or_else(|_| "never".to_string())
            .parse::<ApprovalPolicy>()?;

        Ok(Self {
            analysis_frequency_secs: super::parse_u64("ANALYSIS_FREQUENCY_SECS", 300)?,
            asset_pairs,
            asset_class,
            min_confidence_threshold: super::parse_f64("MIN_CONFIDENCE_THRESHOLD", 60.0)?,
            max_daily_trades: super::parse_u64("MAX_DAILY_TRADES", 10)? as u32,
            kill_switch_loss_pct: super::parse_f64("KILL_SWITCH_LOSS_PCT", 10.0)?,
            approval_policy,
            approval_timeout_secs: super::parse_u64("APPROVAL_TIMEOUT_SECS", 300)?,
            max_retries: super::parse_u64("REASONING_MAX_RETRIES", 3)? as u32,
            position_size_fraction: super::parse_f64("POSITION_SIZE_FRACTION", 0.05)?,
        })
    }
}

impl Default for AgentEnvConfig {
    fn default() -> Self {
        Self {
            analysis_frequency_secs: 300,
            asset_pairs: vec![AssetPair::new("BTC/USD").expect("static pair")],
            asset_class: AssetClass::Crypto,
            min_confidence_threshold: 60.0,
            max_daily_trades: 10,
            kill_switch_loss_pct: 10.0,
            approval_policy: ApprovalPolicy::Never,
            approval_timeout_secs: 300,
            max_retries: 3,
            position_size_fraction: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_policy_parsing() {
        assert_eq!(
            "on_new_asset".parse::<ApprovalPolicy>().unwrap(),
            ApprovalPolicy::OnNewAsset
        );
        assert!("sometimes".parse::<ApprovalPolicy>().is_err());
    }

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AgentEnvConfig::default();
        assert!(cfg.min_confidence_threshold > 0.0);
        assert!(cfg.max_daily_trades > 0);
        assert!(!cfg.asset_pairs.is_empty());
    }
}
