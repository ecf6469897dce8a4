use crate::application::risk::pipeline::{RiskInput, RiskValidator, ValidationResult};
use async_trait::async_trait;

/// Blocks new trades once the portfolio drawdown reaches the cap.
/// Equality rejects.
pub struct DrawdownValidator {
    max_drawdown_pct: f64,
}

impl DrawdownValidator {
    pub fn new(max_drawdown_pct: f64) -> Self {
        Self { max_drawdown_pct }
    }
}

#[async_trait]
impl RiskValidator for DrawdownValidator {
    fn name(&self) -> &str {
        "max_drawdown"
    }

    async fn validate(&self, input: &RiskInput<'_>) -> ValidationResult {
        let fraction = input.ctx.snapshot.pnl_fraction();
        let limit = -self.max_drawdown_pct / 100.0;
        if fraction > limit {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject(format!(
                "portfolio P&L {:.2}% breaches -{:.2}% drawdown cap",
                fraction * 100.0,
                self.max_drawdown_pct
            ))
        }
    }

    fn priority(&self) -> u8 {
        30
    }
}
