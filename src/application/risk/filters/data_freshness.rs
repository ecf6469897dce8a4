use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;

/// Market data must be younger than the asset class's staleness bound.
pub struct DataFreshnessValidator;

#[async_trait]
impl RiskValidator for DataFreshnessValidator {
    fn name(&self) -> &str {
        "stale_data"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let age = input.ctx.market_age;
        let max = input.ctx.asset_class.max_staleness();
        if age <= max {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!(
                "market data age {}s exceeds {}s",
                age.num_seconds(),
                max.num_seconds()
            ))
        }
    }

    fn priority(&self) -> u8 {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::filters::test_support::{test_decision, test_risk_context};
    use crate::domain::decision::TradeAction;
    use chrono::Duration;

    #[tokio::test]
    async fn test_rejects_stale_crypto_data() {
        let decision = test_decision(TradeAction::Buy, 80.0);
        let mut ctx = test_risk_context();
        // Crypto staleness bound is 15 minutes
        ctx.market_age = Duration::minutes(20);

        let result = DataFreshnessValidator
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn test_boundary_age_is_fresh() {
        let decision = test_decision(TradeAction::Buy, 80.0);
        let mut ctx = test_risk_context();
        ctx.market_age = Duration::minutes(15);

        let result = DataFreshnessValidator
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert_eq!(result, ValidationResult::Approve);
    }
}
