//! Ensemble configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Aggregation strategy over the enabled providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleStrategyKind {
    Single,
    Weighted,
    Majority,
    Stacking,
    Debate,
}

impl EnsembleStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleStrategyKind::Single => "single",
            EnsembleStrategyKind::Weighted => "weighted",
            EnsembleStrategyKind::Majority => "majority",
            EnsembleStrategyKind::Stacking => "stacking",
            EnsembleStrategyKind::Debate => "debate",
        }
    }
}

impl FromStr for EnsembleStrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(EnsembleStrategyKind::Single),
            "weighted" => Ok(EnsembleStrategyKind::Weighted),
            "majority" => Ok(EnsembleStrategyKind::Majority),
            "stacking" => Ok(EnsembleStrategyKind::Stacking),
            "debate" => Ok(EnsembleStrategyKind::Debate),
            _ => anyhow::bail!(
                "Invalid ENSEMBLE_STRATEGY: {}. Must be 'single', 'weighted', 'majority', 'stacking', or 'debate'",
                s
            ),
        }
    }
}

/// Named roles for debate mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateRolesConfig {
    pub bull: String,
    pub bear: String,
    pub judge: String,
}

/// Ensemble environment configuration
#[derive(Debug, Clone)]
pub struct EnsembleEnvConfig {
    pub strategy: EnsembleStrategyKind,
    /// Enabled provider names; stable lexicographic order is imposed later
    pub providers: Vec<String>,
    /// Initial weights; uniform when unset. Renormalized at load.
    pub weights: HashMap<String, f64>,
    pub debate_roles: Option<DebateRolesConfig>,
    /// Per-provider timeout
    pub provider_timeout_secs: u64,
    /// Overall aggregation timeout; must be >= the per-provider timeout
    pub aggregator_timeout_secs: u64,
}

impl EnsembleEnvConfig {
    pub fn from_env() -> Result<Self> {
        let strategy = env::var("ENSEMBLE_STRATEGY")
            .unwrap_or_else(|_| "single".to_string())
            .parse::<EnsembleStrategyKind>()?;

        let providers: Vec<String> = env::var("ENSEMBLE_PROVIDERS")
            .unwrap_or_else(|_| "local".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if providers.is_empty() {
            anyhow::bail!("ENSEMBLE_PROVIDERS must name at least one provider");
        }

        let weights = match env::var("ENSEMBLE_WEIGHTS") {
            Ok(raw) => Self::parse_weights(&raw)?,
            Err(_) => Self::uniform_weights(&providers),
        };

        let debate_roles = match env::var("ENSEMBLE_DEBATE_ROLES") {
            Ok(raw) => Some(Self::parse_debate_roles(&raw)?),
            Err(_) => None,
        };

        if strategy == EnsembleStrategyKind::Debate && debate_roles.is_none() {
            anyhow::bail!("ENSEMBLE_DEBATE_ROLES is required for the debate strategy");
        }

        let provider_timeout_secs = super::parse_u64("PROVIDER_TIMEOUT_SECS", 30)?;
        let aggregator_timeout_secs =
            super::parse_u64("AGGREGATOR_TIMEOUT_SECS", 60)?.max(provider_timeout_secs);

        Ok(Self {
            strategy,
            providers,
            weights,
            debate_roles,
            provider_timeout_secs,
            aggregator_timeout_secs,
        })
    }

    pub fn uniform_weights(providers: &[String]) -> HashMap<String, f64> {
        let w = 1.0 / providers.len() as f64;
        providers.iter().map(|p| (p.clone(), w)).collect()
    }

    /// `"alpha:0.4,beta:0.4,gamma:0.2"`
    fn parse_weights(raw: &str) -> Result<HashMap<String, f64>> {
        let mut weights = HashMap::new();
        for part in raw.split(',') {
            let (name, value) = part
                .split_once(':')
                .with_context(|| format!("Invalid ENSEMBLE_WEIGHTS entry: '{}'", part))?;
            let w = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid weight for provider '{}'", name))?;
            weights.insert(name.trim().to_string(), w);
        }
        Ok(weights)
    }

    /// `"bull:alpha,bear:beta,judge:gamma"`
    fn parse_debate_roles(raw: &str) -> Result<DebateRolesConfig> {
        let mut bull = None;
        let mut bear = None;
        let mut judge = None;
        for part in raw.split(',') {
            let (role, name) = part
                .split_once(':')
                .with_context(|| format!("Invalid ENSEMBLE_DEBATE_ROLES entry: '{}'", part))?;
            let name = name.trim().to_string();
            match role.trim().to_lowercase().as_str() {
                "bull" => bull = Some(name),
                "bear" => bear = Some(name),
                "judge" => judge = Some(name),
                other => anyhow::bail!("Unknown debate role: '{}'", other),
            }
        }
        Ok(DebateRolesConfig {
            bull: bull.context("Debate roles missing 'bull'")?,
            bear: bear.context("Debate roles missing 'bear'")?,
            judge: judge.context("Debate roles missing 'judge'")?,
        })
    }
}

impl Default for EnsembleEnvConfig {
    fn default() -> Self {
        let providers = vec!["local".to_string()];
        let weights = Self::uniform_weights(&providers);
        Self {
            strategy: EnsembleStrategyKind::Single,
            providers,
            weights,
            debate_roles: None,
            provider_timeout_secs: 30,
            aggregator_timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "weighted".parse::<EnsembleStrategyKind>().unwrap(),
            EnsembleStrategyKind::Weighted
        );
        assert!("plurality".parse::<EnsembleStrategyKind>().is_err());
    }

    #[test]
    fn test_weight_string_parsing() {
        let weights = EnsembleEnvConfig::parse_weights("a:0.4, b:0.4, c:0.2").unwrap();
        assert_eq!(weights.len(), 3);
        assert!((weights["a"] - 0.4).abs() < 1e-9);
        assert!((weights["c"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_debate_role_parsing() {
        let roles =
            EnsembleEnvConfig::parse_debate_roles("bull:alpha,bear:beta,judge:gamma").unwrap();
        assert_eq!(roles.bull, "alpha");
        assert_eq!(roles.bear, "beta");
        assert_eq!(roles.judge, "gamma");

        assert!(EnsembleEnvConfig::parse_debate_roles("bull:alpha,bear:beta").is_err());
    }

    #[test]
    fn test_uniform_weights_sum_to_one() {
        let providers = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let weights = EnsembleEnvConfig::uniform_weights(&providers);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
