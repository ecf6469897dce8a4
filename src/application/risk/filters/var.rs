use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;

// One-sided 95% z-score for the parametric VaR estimate.
const Z_95: f64 = 1.6449;

/// Parametric 95% VaR including the proposed trade, as a percentage of NAV.
pub struct VarValidator {
    max_var_pct: f64,
}

impl VarValidator {
    pub fn new(max_var_pct: f64) -> Self {
        Self { max_var_pct }
    }
}

#[async_trait]
impl RiskValidator for VarValidator {
    fn name(&self) -> &str {
        "var_exceeded"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let nav = input.ctx.snapshot.nav();
        if nav <= rust_decimal::Decimal::ZERO {
            return ValidationResult::Reject("non-positive NAV".to_string());
        }

        let proposed = input.decision.suggested_size * input.ctx.last_price;
        let existing_fraction = (input.ctx.snapshot.gross_exposure() / nav)
            .to_f64()
            .unwrap_or(0.0);
        let proposed_fraction = (proposed / nav).to_f64().unwrap_or(0.0);

        let var_pct =
            Z_95 * input.ctx.realized_volatility * (existing_fraction + proposed_fraction) * 100.0;

        if var_pct <= self.max_var_pct {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!(
                "estimated 95% VaR {:.2}% exceeds {:.2}% cap",
                var_pct, self.max_var_pct
            ))
        }
    }

    fn priority(&self) -> u8 {
        50
    }
}
