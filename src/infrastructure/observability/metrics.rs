//! Prometheus metrics definitions for Sagetrade
//!
//! All metrics use the `sagetrade_` prefix and are read-only.

use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the trading orchestrator
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Final decisions by action and strategy
    pub decisions_total: CounterVec,
    /// Gatekeeper rejections by validator and asset class
    pub risk_rejections_total: CounterVec,
    /// Gatekeeper approvals by asset class
    pub risk_approvals_total: CounterVec,
    /// Warn-only validator hits
    pub risk_warnings_total: CounterVec,
    /// Breaker calls by instance and outcome (success/failure/rejected)
    pub breaker_calls_total: CounterVec,
    /// Breaker state transitions by instance and target state
    pub breaker_transitions_total: CounterVec,
    /// Breaker state per instance (0=closed, 1=open, 2=half_open)
    pub breaker_state: GenericGaugeVec<AtomicF64>,
    /// Provider failures (error or timeout) per provider
    pub provider_errors_total: CounterVec,
    /// Provider decide() latency per provider
    pub provider_latency_seconds: HistogramVec,
    /// Ensembles that fell back to HOLD on insufficient quorum
    pub quorum_failures_total: Counter,
    /// Live position trackers
    pub trackers_active: GenericGauge<AtomicF64>,
    /// Portfolio NAV
    pub portfolio_nav: GenericGauge<AtomicF64>,
    /// Portfolio unrealized P&L fraction
    pub portfolio_pnl_fraction: GenericGauge<AtomicF64>,
    /// Confirmed closes by reason
    pub trades_closed_total: CounterVec,
    /// OODA cycles by terminal event of the cycle
    pub cycles_total: CounterVec,
    /// Portfolio kill switch activations
    pub kill_switch_total: Counter,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let decisions_total = CounterVec::new(
            Opts::new(
                "sagetrade_decisions_total",
                "Final decisions by action and strategy",
            ),
            &["action", "strategy"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let risk_rejections_total = CounterVec::new(
            Opts::new(
                "sagetrade_risk_rejections_total",
                "Gatekeeper rejections by validator and asset class",
            ),
            &["reason", "asset_class"],
        )?;
        registry.register(Box::new(risk_rejections_total.clone()))?;

        let risk_approvals_total = CounterVec::new(
            Opts::new(
                "sagetrade_risk_approvals_total",
                "Gatekeeper approvals by asset class",
            ),
            &["asset_class"],
        )?;
        registry.register(Box::new(risk_approvals_total.clone()))?;

        let risk_warnings_total = CounterVec::new(
            Opts::new(
                "sagetrade_risk_warnings_total",
                "Warn-only validator hits by validator",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(risk_warnings_total.clone()))?;

        let breaker_calls_total = CounterVec::new(
            Opts::new(
                "sagetrade_breaker_calls_total",
                "Circuit breaker calls by instance and outcome",
            ),
            &["name", "outcome"],
        )?;
        registry.register(Box::new(breaker_calls_total.clone()))?;

        let breaker_transitions_total = CounterVec::new(
            Opts::new(
                "sagetrade_breaker_transitions_total",
                "Circuit breaker state transitions by instance and target",
            ),
            &["name", "to"],
        )?;
        registry.register(Box::new(breaker_transitions_total.clone()))?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                "sagetrade_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half_open)",
            ),
            &["name"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let provider_errors_total = CounterVec::new(
            Opts::new(
                "sagetrade_provider_errors_total",
                "Provider failures (error or timeout)",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(provider_errors_total.clone()))?;

        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sagetrade_provider_latency_seconds",
                "Provider decide() latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;
        registry.register(Box::new(provider_latency_seconds.clone()))?;

        let quorum_failures_total = Counter::with_opts(Opts::new(
            "sagetrade_quorum_failures_total",
            "Ensembles that returned HOLD on insufficient quorum",
        ))?;
        registry.register(Box::new(quorum_failures_total.clone()))?;

        let trackers_active = Gauge::with_opts(Opts::new(
            "sagetrade_trackers_active",
            "Live position trackers",
        ))?;
        registry.register(Box::new(trackers_active.clone()))?;

        let portfolio_nav =
            Gauge::with_opts(Opts::new("sagetrade_portfolio_nav", "Portfolio NAV"))?;
        registry.register(Box::new(portfolio_nav.clone()))?;

        let portfolio_pnl_fraction = Gauge::with_opts(Opts::new(
            "sagetrade_portfolio_pnl_fraction",
            "Portfolio unrealized P&L fraction",
        ))?;
        registry.register(Box::new(portfolio_pnl_fraction.clone()))?;

        let trades_closed_total = CounterVec::new(
            Opts::new(
                "sagetrade_trades_closed_total",
                "Confirmed position closes by reason",
            ),
            &["closed_by"],
        )?;
        registry.register(Box::new(trades_closed_total.clone()))?;

        let cycles_total = CounterVec::new(
            Opts::new(
                "sagetrade_cycles_total",
                "OODA cycles by terminal event of the cycle",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let kill_switch_total = Counter::with_opts(Opts::new(
            "sagetrade_kill_switch_total",
            "Portfolio kill switch activations",
        ))?;
        registry.register(Box::new(kill_switch_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            decisions_total,
            risk_rejections_total,
            risk_approvals_total,
            risk_warnings_total,
            breaker_calls_total,
            breaker_transitions_total,
            breaker_state,
            provider_errors_total,
            provider_latency_seconds,
            quorum_failures_total,
            trackers_active,
            portfolio_nav,
            portfolio_pnl_fraction,
            trades_closed_total,
            cycles_total,
            kill_switch_total,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        Ok(encoder.encode_to_string(&families)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics
            .decisions_total
            .with_label_values(&["BUY", "weighted"])
            .inc();
        metrics
            .risk_rejections_total
            .with_label_values(&["stale_data", "crypto"])
            .inc();
        metrics.trackers_active.set(3.0);

        let text = metrics.gather().unwrap();
        assert!(text.contains("sagetrade_decisions_total"));
        assert!(text.contains("sagetrade_risk_rejections_total"));
        assert!(text.contains("sagetrade_trackers_active 3"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        // Each Metrics owns its registry, so two instances can coexist.
        let a = Metrics::new();
        let b = Metrics::new();
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
