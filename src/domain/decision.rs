use crate::domain::asset::AssetPair;
use crate::domain::market::{MarketContext, VolatilityRegime};
use crate::domain::portfolio::PortfolioSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, TradeAction::Hold)
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// One provider's contribution to a decision cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecision {
    pub provider: String,
    pub action: TradeAction,
    /// 0..=100
    pub confidence: f64,
    pub reasoning: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProviderDecision {
    pub fn errored(provider: &str, error: impl fmt::Display, latency_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            action: TradeAction::Hold,
            confidence: 0.0,
            reasoning: String::new(),
            latency_ms,
            error: Some(error.to_string()),
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    Bull,
    Bear,
    Judge,
}

impl fmt::Display for DebateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateRole::Bull => write!(f, "bull"),
            DebateRole::Bear => write!(f, "bear"),
            DebateRole::Judge => write!(f, "judge"),
        }
    }
}

/// One advocate's transcript, handed to the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateArgument {
    pub role: DebateRole,
    pub provider: String,
    pub argument: String,
}

/// Everything a provider sees when asked to decide.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub market: MarketContext,
    pub portfolio: PortfolioSnapshot,
    /// Set in debate mode; `None` for plain ensemble queries.
    pub role: Option<DebateRole>,
    /// Advocate transcripts; populated only for the judge.
    pub transcripts: Vec<DebateArgument>,
}

impl DecisionContext {
    pub fn new(market: MarketContext, portfolio: PortfolioSnapshot) -> Self {
        Self {
            market,
            portfolio,
            role: None,
            transcripts: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: DebateRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_transcripts(mut self, transcripts: Vec<DebateArgument>) -> Self {
        self.transcripts = transcripts;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStatus {
    Met,
    Insufficient,
}

/// How an ensemble arrived at its decision; persisted for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleMetadata {
    pub strategy: String,
    pub quorum: QuorumStatus,
    /// Weighted vote mass per action.
    pub votes: BTreeMap<String, f64>,
    pub errored_providers: Vec<String>,
    /// `"provider: reasoning"` for providers that lost the vote.
    pub dissenting: Vec<String>,
}

impl EnsembleMetadata {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            quorum: QuorumStatus::Met,
            votes: BTreeMap::new(),
            errored_providers: Vec::new(),
            dissenting: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Signal,
    Manual,
    PortfolioKillSwitch,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::Signal => write!(f, "signal"),
            CloseReason::Manual => write!(f, "manual"),
            CloseReason::PortfolioKillSwitch => write!(f, "portfolio_kill_switch"),
        }
    }
}

/// Terminal record of a closed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: String,
    pub decision_id: uuid::Uuid,
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub closed_by: CloseReason,
}

/// A proposed action for one asset. Append-only once persisted; only the
/// `outcome` sub-record may be attached later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub asset: AssetPair,
    pub action: TradeAction,
    /// 0..=100
    pub confidence: f64,
    pub reasoning: String,
    pub suggested_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub providers: Vec<ProviderDecision>,
    pub ensemble: EnsembleMetadata,
    /// Market regime at decision time; drives regime-specific feedback.
    pub regime: VolatilityRegime,
    pub approved: Option<bool>,
    pub rejection_reason: Option<String>,
    pub outcome: Option<TradeOutcome>,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_is_not_actionable() {
        assert!(!TradeAction::Hold.is_actionable());
        assert!(TradeAction::Buy.is_actionable());
        assert!(TradeAction::Sell.is_actionable());
    }

    #[test]
    fn test_errored_provider_decision_defaults_to_hold() {
        let pd = ProviderDecision::errored("alpha", "timeout", 1500);
        assert!(pd.is_errored());
        assert_eq!(pd.action, TradeAction::Hold);
        assert_eq!(pd.confidence, 0.0);
    }

    #[test]
    fn test_action_serde_uppercase() {
        let json = serde_json::to_string(&TradeAction::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
    }
}
