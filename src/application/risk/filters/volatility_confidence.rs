use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;

/// In a high-volatility regime the decision must carry extra conviction.
pub struct VolatilityConfidenceValidator {
    high_vol_threshold: f64,
    high_vol_min_confidence: f64,
}

impl VolatilityConfidenceValidator {
    pub fn new(high_vol_threshold: f64, high_vol_min_confidence: f64) -> Self {
        Self {
            high_vol_threshold,
            high_vol_min_confidence,
        }
    }
}

#[async_trait]
impl RiskValidator for VolatilityConfidenceValidator {
    fn name(&self) -> &str {
        "low_confidence_high_vol"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        if input.ctx.realized_volatility <= self.high_vol_threshold {
            return ValidationResult::Approve;
        }
        if input.decision.confidence >= self.high_vol_min_confidence {
            return ValidationResult::Approve;
        }
        ValidationResult::Reject(format!(
            "confidence {:.0} under {:.0} floor at {:.3} realized volatility",
            input.decision.confidence, self.high_vol_min_confidence, input.ctx.realized_volatility
        ))
    }

    fn priority(&self) -> u8 {
        70
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::filters::test_support::{test_decision, test_risk_context};
    use crate::domain::decision::TradeAction;

    #[tokio::test]
    async fn test_calm_market_ignores_confidence() {
        let decision = test_decision(TradeAction::Buy, 40.0);
        let ctx = test_risk_context();

        let result = VolatilityConfidenceValidator::new(0.05, 75.0)
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert_eq!(result, ValidationResult::Approve);
    }

    #[tokio::test]
    async fn test_high_vol_requires_conviction() {
        let decision = test_decision(TradeAction::Buy, 60.0);
        let mut ctx = test_risk_context();
        ctx.realized_volatility = 0.08;

        let validator = VolatilityConfidenceValidator::new(0.05, 75.0);
        let result = validator
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert!(matches!(result, ValidationResult::Reject(_)));

        let confident = test_decision(TradeAction::Buy, 90.0);
        let result = validator
            .validate(&RiskInput {
                decision: &confident,
                ctx: &ctx,
            })
            .await;
        assert_eq!(result, ValidationResult::Approve);
    }
}
