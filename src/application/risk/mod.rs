//! Risk gatekeeper: layered validators between a proposed decision and any
//! platform call. Pure validation; the only side effects are metrics and
//! logs.

pub mod filters;
pub mod pipeline;

use crate::config::RiskEnvConfig;
use crate::domain::decision::Decision;
use crate::domain::risk::RiskContext;
use crate::infrastructure::observability::Metrics;
use filters::{
    ConcentrationValidator, CorrelationValidator, DataFreshnessValidator, DrawdownValidator,
    LeverageValidator, MarketHoursValidator, VarValidator, VolatilityConfidenceValidator,
};
use pipeline::{RiskInput, RiskValidationPipeline};
use tracing::info;

/// Gatekeeper answer: approve, or reject with the failing layer's reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reason: Option<String>,
}

pub struct RiskGatekeeper {
    pipeline: RiskValidationPipeline,
    metrics: Metrics,
}

impl RiskGatekeeper {
    /// Assemble the full layer stack in priority order.
    pub fn new(config: &RiskEnvConfig, metrics: Metrics) -> Self {
        let pipeline = RiskValidationPipeline::new(vec![
            Box::new(MarketHoursValidator),
            Box::new(DataFreshnessValidator),
            Box::new(DrawdownValidator::new(config.max_drawdown_pct)),
            Box::new(CorrelationValidator::intra(config)),
            Box::new(VarValidator::new(config.max_var_pct)),
            Box::new(CorrelationValidator::cross(config)),
            Box::new(ConcentrationValidator::new(config.max_position_fraction)),
            Box::new(LeverageValidator::new(config.max_leverage)),
            Box::new(VolatilityConfidenceValidator::new(
                config.high_vol_threshold,
                config.high_vol_min_confidence,
            )),
        ]);
        Self { pipeline, metrics }
    }

    pub fn with_pipeline(pipeline: RiskValidationPipeline, metrics: Metrics) -> Self {
        Self { pipeline, metrics }
    }

    /// Validate one decision against the current risk context.
    pub async fn validate(&self, decision: &Decision, ctx: &RiskContext) -> RiskVerdict {
        let outcome = self
            .pipeline
            .validate(&RiskInput { decision, ctx })
            .await;

        let asset_class = ctx.asset_class.to_string();
        for (validator, detail) in &outcome.warnings {
            self.metrics
                .risk_warnings_total
                .with_label_values(&[validator])
                .inc();
            info!(
                "RiskGatekeeper: Warning from {} for {}: {}",
                validator, decision.asset, detail
            );
        }

        match outcome.rejection {
            Some((validator, detail)) => {
                self.metrics
                    .risk_rejections_total
                    .with_label_values(&[&validator, &asset_class])
                    .inc();
                info!(
                    "RiskGatekeeper: Rejected {} {} ({}: {})",
                    decision.action, decision.asset, validator, detail
                );
                RiskVerdict {
                    approved: false,
                    reason: Some(format!("{}: {}", validator, detail)),
                }
            }
            None => {
                self.metrics
                    .risk_approvals_total
                    .with_label_values(&[&asset_class])
                    .inc();
                RiskVerdict {
                    approved: true,
                    reason: None,
                }
            }
        }
    }

    pub fn active_layers(&self) -> Vec<&str> {
        self.pipeline.list_active_validators()
    }
}
