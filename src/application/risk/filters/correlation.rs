use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use crate::config::RiskEnvConfig;
use crate::domain::risk::CorrelationMode;
use async_trait::async_trait;

/// Correlation-cluster check, instantiated once per scope.
///
/// Counts the proposed asset plus every holding whose pairwise correlation
/// with it clears the threshold; at `max_correlated_count` the check trips.
/// The mode decides whether a trip rejects or only warns.
pub struct CorrelationValidator {
    scope: &'static str,
    threshold: f64,
    mode: CorrelationMode,
    max_correlated_count: usize,
    priority: u8,
}

impl CorrelationValidator {
    /// Positions on the same platform; blocking by default.
    pub fn intra(config: &RiskEnvConfig) -> Self {
        Self {
            scope: "intra_correlation",
            threshold: config.intra_correlation_threshold,
            mode: config.intra_correlation_mode,
            max_correlated_count: config.max_correlated_count,
            priority: 40,
        }
    }

    /// Positions across platforms; warn-only by default.
    pub fn cross(config: &RiskEnvConfig) -> Self {
        Self {
            scope: "cross_correlation",
            threshold: config.cross_correlation_threshold,
            mode: config.cross_correlation_mode,
            max_correlated_count: config.max_correlated_count,
            priority: 55,
        }
    }
}

#[async_trait]
impl RiskValidator for CorrelationValidator {
    fn name(&self) -> &str {
        self.scope
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let target = input.decision.asset.symbol();

        let correlated = input
            .ctx
            .snapshot
            .positions
            .iter()
            .filter(|p| p.asset.symbol() != target)
            .filter(|p| input.ctx.correlation(target, p.asset.symbol()) >= self.threshold)
            .count();

        // Cluster size includes the proposed position itself.
        let cluster = correlated + 1;
        if cluster < self.max_correlated_count {
            return ValidationResult::Approve;
        }

        let detail = format!(
            "{} assets correlated >= {:.2} (cap {})",
            cluster, self.threshold, self.max_correlated_count
        );
        match self.mode {
            CorrelationMode::Block => ValidationResult::Reject(detail),
            CorrelationMode::Warn => ValidationResult::Warn(detail),
        }
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::filters::test_support::{
        test_decision, test_risk_context_with_positions,
    };
    use crate::domain::decision::TradeAction;

    fn context_with_correlated_holdings() -> crate::domain::risk::RiskContext {
        let mut ctx = test_risk_context_with_positions(&["ETHUSD", "SOLUSD"]);
        ctx.correlations
            .insert(("BTCUSD".to_string(), "ETHUSD".to_string()), 0.92);
        ctx.correlations
            .insert(("BTCUSD".to_string(), "SOLUSD".to_string()), 0.90);
        ctx
    }

    #[tokio::test]
    async fn test_intra_blocks_correlated_cluster() {
        let config = RiskEnvConfig {
            max_correlated_count: 3,
            ..Default::default()
        };
        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = context_with_correlated_holdings();

        let result = CorrelationValidator::intra(&config)
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert!(matches!(result, ValidationResult::Reject(_)));
    }

    #[tokio::test]
    async fn test_cross_only_warns() {
        let config = RiskEnvConfig {
            max_correlated_count: 3,
            cross_correlation_threshold: 0.85,
            ..Default::default()
        };
        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = context_with_correlated_holdings();

        let result = CorrelationValidator::cross(&config)
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert!(matches!(result, ValidationResult::Warn(_)));
    }

    #[tokio::test]
    async fn test_uncorrelated_holdings_pass() {
        let config = RiskEnvConfig::default();
        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = test_risk_context_with_positions(&["ETHUSD", "SOLUSD"]);

        let result = CorrelationValidator::intra(&config)
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert_eq!(result, ValidationResult::Approve);
    }
}
