//! Validator trait and fail-fast validation pipeline.

use crate::domain::decision::Decision;
use crate::domain::risk::RiskContext;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Result of a risk validation check
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Validation passed, trade can proceed
    Approve,
    /// Validation failed, trade should be rejected with a reason
    Reject(String),
    /// Breach recorded but not blocking (warn-only layers)
    Warn(String),
}

/// Everything a validator may inspect. No mutation.
#[derive(Debug)]
pub struct RiskInput<'a> {
    pub decision: &'a Decision,
    pub ctx: &'a RiskContext,
}

/// Trait for all risk validators
///
/// Each validator implements one layered check. Validators are executed in
/// priority order by the pipeline; the first rejection wins.
#[async_trait]
pub trait RiskValidator: Send + Sync {
    /// Stable reason code; doubles as the metrics label
    fn name(&self) -> &str;

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult;

    /// Disabled validators are skipped during pipeline execution.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Priority order (lower = earlier execution)
    fn priority(&self) -> u8 {
        100
    }
}

/// Outcome of a full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// `(validator name, detail)` of the first rejection, if any
    pub rejection: Option<(String, String)>,
    /// Warn-only breaches encountered along the way
    pub warnings: Vec<(String, String)>,
}

impl PipelineOutcome {
    pub fn is_approved(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Orchestrates the execution of the layered validators.
pub struct RiskValidationPipeline {
    validators: Vec<Box<dyn RiskValidator>>,
}

impl RiskValidationPipeline {
    /// Validators are automatically sorted by priority (lower executes first).
    pub fn new(validators: Vec<Box<dyn RiskValidator>>) -> Self {
        let mut sorted_validators = validators;
        sorted_validators.sort_by_key(|v| v.priority());

        Self {
            validators: sorted_validators,
        }
    }

    pub fn add_validator(&mut self, validator: Box<dyn RiskValidator>) {
        self.validators.push(validator);
        self.validators.sort_by_key(|v| v.priority());
    }

    /// Execute all enabled validators in order; first rejection wins.
    pub async fn validate(&self, input: &RiskInput<'_>) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        for validator in &self.validators {
            if !validator.is_enabled() {
                debug!("Skipping disabled validator: {}", validator.name());
                continue;
            }

            match validator.validate(input).await {
                ValidationResult::Reject(reason) => {
                    warn!("Validation failed at step {}: {}", validator.name(), reason);
                    outcome.rejection = Some((validator.name().to_string(), reason));
                    return outcome;
                }
                ValidationResult::Warn(reason) => {
                    warn!("Validation warning at step {}: {}", validator.name(), reason);
                    outcome.warnings.push((validator.name().to_string(), reason));
                }
                ValidationResult::Approve => {
                    debug!("Validator passed: {}", validator.name());
                }
            }
        }

        outcome
    }

    /// Active validator names in execution order (for introspection).
    pub fn list_active_validators(&self) -> Vec<&str> {
        self.validators
            .iter()
            .filter(|v| v.is_enabled())
            .map(|v| v.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::filters::test_support::{test_decision, test_risk_context};
    use crate::domain::decision::TradeAction;

    struct MockValidator {
        name: String,
        result: ValidationResult,
        priority: u8,
    }

    #[async_trait]
    impl RiskValidator for MockValidator {
        fn name(&self) -> &str {
            &self.name
        }

        async fn validate(&self, _input: &RiskInput<'_>) -> ValidationResult {
            self.result.clone()
        }

        fn priority(&self) -> u8 {
            self.priority
        }
    }

    #[tokio::test]
    async fn test_pipeline_execution_order() {
        let v1 = MockValidator {
            name: "V1".to_string(),
            result: ValidationResult::Approve,
            priority: 10,
        };
        let v2 = MockValidator {
            name: "V2".to_string(),
            result: ValidationResult::Approve,
            priority: 5,
        };

        let pipeline = RiskValidationPipeline::new(vec![Box::new(v1), Box::new(v2)]);
        assert_eq!(pipeline.list_active_validators(), vec!["V2", "V1"]);

        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = test_risk_context();
        let outcome = pipeline
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;
        assert!(outcome.is_approved());
    }

    #[tokio::test]
    async fn test_pipeline_fail_fast() {
        let v1 = MockValidator {
            name: "V1".to_string(),
            result: ValidationResult::Approve,
            priority: 5,
        };
        let v2 = MockValidator {
            name: "V2".to_string(),
            result: ValidationResult::Reject("nope".to_string()),
            priority: 10,
        };
        let v3 = MockValidator {
            name: "V3".to_string(),
            result: ValidationResult::Reject("unreached".to_string()),
            priority: 15,
        };

        let pipeline =
            RiskValidationPipeline::new(vec![Box::new(v1), Box::new(v2), Box::new(v3)]);

        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = test_risk_context();
        let outcome = pipeline
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;

        let (name, reason) = outcome.rejection.unwrap();
        assert_eq!(name, "V2");
        assert_eq!(reason, "nope");
    }

    #[tokio::test]
    async fn test_warnings_do_not_block() {
        let warn = MockValidator {
            name: "W".to_string(),
            result: ValidationResult::Warn("correlated".to_string()),
            priority: 5,
        };
        let ok = MockValidator {
            name: "OK".to_string(),
            result: ValidationResult::Approve,
            priority: 10,
        };

        let pipeline = RiskValidationPipeline::new(vec![Box::new(warn), Box::new(ok)]);

        let decision = test_decision(TradeAction::Buy, 80.0);
        let ctx = test_risk_context();
        let outcome = pipeline
            .validate(&RiskInput {
                decision: &decision,
                ctx: &ctx,
            })
            .await;

        assert!(outcome.is_approved());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].0, "W");
    }
}
