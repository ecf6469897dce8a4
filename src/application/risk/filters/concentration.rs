use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Proposed position size must stay under `max_position_fraction` of NAV.
pub struct ConcentrationValidator {
    max_position_fraction: f64,
}

impl ConcentrationValidator {
    pub fn new(max_position_fraction: f64) -> Self {
        Self {
            max_position_fraction,
        }
    }
}

#[async_trait]
impl RiskValidator for ConcentrationValidator {
    fn name(&self) -> &str {
        "concentration"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let nav = input.ctx.snapshot.nav();
        if nav <= Decimal::ZERO {
            return ValidationResult::Reject("non-positive NAV".to_string());
        }

        let proposed = input.decision.suggested_size * input.ctx.last_price;
        let cap = nav * Decimal::from_f64(self.max_position_fraction).unwrap_or(Decimal::ZERO);
        if proposed <= cap {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!(
                "position {} exceeds {:.0}% of NAV ({})",
                proposed,
                self.max_position_fraction * 100.0,
                cap
            ))
        }
    }

    fn priority(&self) -> u8 {
        60
    }
}

/// Aggregate gross exposure including the proposed trade must stay under
/// `max_leverage` times NAV.
pub struct LeverageValidator {
    max_leverage: f64,
}

impl LeverageValidator {
    pub fn new(max_leverage: f64) -> Self {
        Self { max_leverage }
    }
}

#[async_trait]
impl RiskValidator for LeverageValidator {
    fn name(&self) -> &str {
        "leverage"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let nav = input.ctx.snapshot.nav();
        if nav <= Decimal::ZERO {
            return ValidationResult::Reject("non-positive NAV".to_string());
        }

        let proposed = input.decision.suggested_size * input.ctx.last_price;
        let gross = input.ctx.snapshot.gross_exposure() + proposed;
        let leverage = (gross / nav).to_f64().unwrap_or(f64::INFINITY);

        if leverage <= self.max_leverage {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!(
                "aggregate leverage {:.2}x exceeds {:.2}x cap",
                leverage, self.max_leverage
            ))
        }
    }

    fn priority(&self) -> u8 {
        65
    }
}
