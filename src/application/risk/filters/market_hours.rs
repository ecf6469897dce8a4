use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;
use chrono::Utc;

/// Non-24/7 asset classes must not trade while the venue is closed.
pub struct MarketHoursValidator;

#[async_trait]
impl RiskValidator for MarketHoursValidator {
    fn name(&self) -> &str {
        "market_closed"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let class = input.ctx.asset_class;
        if class.is_open(Utc::now()) {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!("venue closed for {} assets", class))
        }
    }

    fn priority(&self) -> u8 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::filters::test_support::{test_decision, test_risk_context};
    use crate::domain::decision::TradeAction;

    #[tokio::test]
    async fn test_crypto_passes_any_time() {
        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = test_risk_context();

        let result = MarketHoursValidator
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert_eq!(result, ValidationResult::Approve);
    }
}
