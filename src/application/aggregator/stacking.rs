//! Stacking support: meta-features over base predictions and the pluggable
//! meta-learner seam.

use crate::domain::decision::{ProviderDecision, TradeAction};

/// Features computed from the base providers' votes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaFeatures {
    /// Fraction of providers agreeing with the dominant action
    pub agreement_ratio: f64,
    pub confidence_mean: f64,
    pub confidence_std: f64,
    pub confidence_min: f64,
    pub confidence_max: f64,
    /// Number of distinct actions voted for
    pub action_diversity: usize,
    pub dominant_action: TradeAction,
    /// Vote share of the dominant action
    pub dominant_strength: f64,
}

impl MetaFeatures {
    /// Compute features from non-errored provider decisions.
    /// Callers must pass at least one vote.
    pub fn compute(votes: &[&ProviderDecision]) -> Self {
        let n = votes.len().max(1) as f64;

        let mut buy = 0usize;
        let mut sell = 0usize;
        let mut hold = 0usize;
        for vote in votes {
            match vote.action {
                TradeAction::Buy => buy += 1,
                TradeAction::Sell => sell += 1,
                TradeAction::Hold => hold += 1,
            }
        }

        // Ties resolve toward HOLD, matching the voting strategies.
        let (dominant_action, dominant_count) = if buy > sell && buy > hold {
            (TradeAction::Buy, buy)
        } else if sell > buy && sell > hold {
            (TradeAction::Sell, sell)
        } else {
            (TradeAction::Hold, hold.max(buy).max(sell))
        };

        let confidences: Vec<f64> = votes.iter().map(|v| v.confidence).collect();
        let mean = confidences.iter().sum::<f64>() / n;
        let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;

        MetaFeatures {
            agreement_ratio: dominant_count as f64 / n,
            confidence_mean: mean,
            confidence_std: variance.sqrt(),
            confidence_min: confidences.iter().copied().fold(f64::INFINITY, f64::min),
            confidence_max: confidences.iter().copied().fold(0.0, f64::max),
            action_diversity: [buy, sell, hold].iter().filter(|c| **c > 0).count(),
            dominant_action,
            dominant_strength: dominant_count as f64 / n,
        }
    }
}

/// Meta-learner seam. Implementations are pure CPU and synchronous.
pub trait MetaLearner: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, features: &MetaFeatures) -> (TradeAction, f64);
}

/// Default meta-learner: act on the dominant action when agreement clears a
/// floor, discounting confidence by disagreement.
pub struct ConsensusMetaLearner {
    min_agreement: f64,
}

impl ConsensusMetaLearner {
    pub fn new(min_agreement: f64) -> Self {
        Self {
            min_agreement: min_agreement.clamp(0.0, 1.0),
        }
    }
}

impl Default for ConsensusMetaLearner {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl MetaLearner for ConsensusMetaLearner {
    fn name(&self) -> &str {
        "consensus"
    }

    fn predict(&self, features: &MetaFeatures) -> (TradeAction, f64) {
        if features.dominant_strength < self.min_agreement {
            return (TradeAction::Hold, features.confidence_mean * 0.5);
        }
        let confidence = (features.confidence_mean * features.agreement_ratio).clamp(0.0, 100.0);
        (features.dominant_action, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(action: TradeAction, confidence: f64) -> ProviderDecision {
        ProviderDecision {
            provider: "p".to_string(),
            action,
            confidence,
            reasoning: String::new(),
            latency_ms: 0,
            error: None,
        }
    }

    #[test]
    fn test_features_on_unanimous_votes() {
        let votes = vec![vote(TradeAction::Buy, 70.0), vote(TradeAction::Buy, 90.0)];
        let refs: Vec<&ProviderDecision> = votes.iter().collect();
        let features = MetaFeatures::compute(&refs);

        assert_eq!(features.dominant_action, TradeAction::Buy);
        assert_eq!(features.agreement_ratio, 1.0);
        assert_eq!(features.action_diversity, 1);
        assert_eq!(features.confidence_mean, 80.0);
        assert_eq!(features.confidence_min, 70.0);
        assert_eq!(features.confidence_max, 90.0);
    }

    #[test]
    fn test_split_votes_resolve_to_hold() {
        let votes = vec![vote(TradeAction::Buy, 80.0), vote(TradeAction::Sell, 80.0)];
        let refs: Vec<&ProviderDecision> = votes.iter().collect();
        let features = MetaFeatures::compute(&refs);

        assert_eq!(features.dominant_action, TradeAction::Hold);
        assert_eq!(features.action_diversity, 2);
    }

    #[test]
    fn test_consensus_learner_holds_below_floor() {
        let learner = ConsensusMetaLearner::new(0.75);
        let votes = vec![
            vote(TradeAction::Buy, 80.0),
            vote(TradeAction::Buy, 80.0),
            vote(TradeAction::Sell, 60.0),
        ];
        let refs: Vec<&ProviderDecision> = votes.iter().collect();
        let features = MetaFeatures::compute(&refs);

        // 2/3 agreement is under the 0.75 floor
        let (action, _) = learner.predict(&features);
        assert_eq!(action, TradeAction::Hold);
    }

    #[test]
    fn test_consensus_learner_acts_on_strong_agreement() {
        let learner = ConsensusMetaLearner::new(0.5);
        let votes = vec![
            vote(TradeAction::Sell, 80.0),
            vote(TradeAction::Sell, 60.0),
            vote(TradeAction::Buy, 50.0),
        ];
        let refs: Vec<&ProviderDecision> = votes.iter().collect();
        let (action, confidence) = learner.predict(&MetaFeatures::compute(&refs));

        assert_eq!(action, TradeAction::Sell);
        assert!(confidence > 0.0 && confidence < 100.0);
    }
}
