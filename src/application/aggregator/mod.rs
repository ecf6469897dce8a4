//! Decision aggregator: queries the enabled providers and folds their votes
//! into a single decision according to the configured strategy.
//!
//! Recoverable conditions (provider timeout, parse error, empty response)
//! never surface to the caller; they become errored `ProviderDecision`s.
//! Configuration errors are fatal at construction.

pub mod debate;
pub mod stacking;

use crate::config::{EnsembleEnvConfig, EnsembleStrategyKind};
use crate::domain::asset::AssetPair;
use crate::domain::decision::{
    Decision, DecisionContext, EnsembleMetadata, ProviderDecision, QuorumStatus, TradeAction,
};
use crate::domain::market::MarketContext;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::ports::DecisionProvider;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use debate::DebatePlan;
use futures::future::join_all;
use rust_decimal::Decimal;
use stacking::MetaLearner;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sizing and exit defaults stamped onto every actionable decision,
/// computed by the agent per cycle.
#[derive(Debug, Clone)]
pub struct DecisionDefaults {
    pub suggested_size: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

pub struct DecisionAggregator {
    /// Lexicographic by provider name, so aggregation is reproducible.
    providers: Vec<Arc<dyn DecisionProvider>>,
    strategy: EnsembleStrategyKind,
    debate: Option<DebatePlan>,
    meta_learner: Arc<dyn MetaLearner>,
    provider_timeout: Duration,
    metrics: Metrics,
}

impl DecisionAggregator {
    pub fn new(
        config: &EnsembleEnvConfig,
        providers: Vec<Arc<dyn DecisionProvider>>,
        meta_learner: Arc<dyn MetaLearner>,
        metrics: Metrics,
    ) -> Result<Self> {
        if providers.is_empty() {
            bail!("Decision aggregator requires at least one provider");
        }

        let mut providers = providers;
        providers.sort_by(|a, b| a.name().cmp(b.name()));
        for pair in providers.windows(2) {
            if pair[0].name() == pair[1].name() {
                bail!("Duplicate provider name: {}", pair[0].name());
            }
        }

        if config.strategy == EnsembleStrategyKind::Single && providers.len() != 1 {
            bail!(
                "Single strategy requires exactly one provider, got {}",
                providers.len()
            );
        }

        let debate = if config.strategy == EnsembleStrategyKind::Debate {
            let roles = config
                .debate_roles
                .as_ref()
                .context("Debate strategy requires debate roles")?;
            let find = |name: &str| {
                providers
                    .iter()
                    .find(|p| p.name() == name)
                    .cloned()
                    .with_context(|| format!("Debate role names unknown provider '{}'", name))
            };
            Some(DebatePlan {
                bull: find(&roles.bull)?,
                bear: find(&roles.bear)?,
                judge: find(&roles.judge)?,
            })
        } else {
            None
        };

        Ok(Self {
            providers,
            strategy: config.strategy,
            debate,
            meta_learner,
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
            metrics,
        })
    }

    pub fn strategy(&self) -> EnsembleStrategyKind {
        self.strategy
    }

    /// Produce a single decision. Never fails for recoverable conditions.
    pub async fn decide(
        &self,
        market: MarketContext,
        portfolio: PortfolioSnapshot,
        weights: &HashMap<String, f64>,
        defaults: &DecisionDefaults,
    ) -> Decision {
        let asset = market.asset.clone();
        let regime = market.regime;
        let ctx = DecisionContext::new(market, portfolio);

        let (action, confidence, reasoning, providers, metadata) = match self.strategy {
            EnsembleStrategyKind::Single => self.decide_single(&ctx).await,
            EnsembleStrategyKind::Weighted => self.decide_vote(&ctx, weights, false).await,
            EnsembleStrategyKind::Majority => self.decide_vote(&ctx, weights, true).await,
            EnsembleStrategyKind::Stacking => self.decide_stacking(&ctx).await,
            EnsembleStrategyKind::Debate => self.decide_debate(&ctx).await,
        };

        self.metrics
            .decisions_total
            .with_label_values(&[&action.to_string(), self.strategy.as_str()])
            .inc();

        let suggested_size = if action.is_actionable() {
            defaults.suggested_size
        } else {
            Decimal::ZERO
        };

        Decision {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            asset,
            action,
            confidence,
            reasoning,
            suggested_size,
            stop_loss_pct: defaults.stop_loss_pct,
            take_profit_pct: defaults.take_profit_pct,
            providers,
            ensemble: metadata,
            regime,
            approved: None,
            rejection_reason: None,
            outcome: None,
        }
    }

    async fn decide_single(
        &self,
        ctx: &DecisionContext,
    ) -> (TradeAction, f64, String, Vec<ProviderDecision>, EnsembleMetadata) {
        let vote = self.query_one(&self.providers[0], ctx).await;
        let mut metadata = EnsembleMetadata::new(self.strategy.as_str());

        if vote.is_errored() {
            metadata.quorum = QuorumStatus::Insufficient;
            metadata.errored_providers.push(vote.provider.clone());
            self.metrics.quorum_failures_total.inc();
            return (
                TradeAction::Hold,
                0.0,
                "provider errored".to_string(),
                vec![vote],
                metadata,
            );
        }

        (
            vote.action,
            vote.confidence,
            vote.reasoning.clone(),
            vec![vote],
            metadata,
        )
    }

    /// Weighted and majority voting share one path; majority forces uniform
    /// weights.
    async fn decide_vote(
        &self,
        ctx: &DecisionContext,
        weights: &HashMap<String, f64>,
        uniform: bool,
    ) -> (TradeAction, f64, String, Vec<ProviderDecision>, EnsembleMetadata) {
        let all = self.query_all(ctx).await;
        let active: Vec<&ProviderDecision> = all.iter().filter(|v| !v.is_errored()).collect();
        let errored: Vec<String> = all
            .iter()
            .filter(|v| v.is_errored())
            .map(|v| v.provider.clone())
            .collect();

        let mut metadata = EnsembleMetadata::new(self.strategy.as_str());
        metadata.errored_providers = errored;

        // A vote needs at least two live participants.
        if active.len() < 2 {
            warn!(
                "DecisionAggregator: Insufficient quorum ({} of {} providers live)",
                active.len(),
                all.len()
            );
            metadata.quorum = QuorumStatus::Insufficient;
            self.metrics.quorum_failures_total.inc();
            return (
                TradeAction::Hold,
                0.0,
                "insufficient quorum".to_string(),
                all,
                metadata,
            );
        }

        // Redistribute errored providers' weight pro rata over the live set.
        let fallback = 1.0 / self.providers.len() as f64;
        let raw: Vec<f64> = active
            .iter()
            .map(|v| {
                if uniform {
                    1.0
                } else {
                    weights.get(&v.provider).copied().unwrap_or(fallback)
                }
            })
            .collect();
        let total: f64 = raw.iter().sum();
        let normalized: Vec<f64> = if total > 0.0 {
            raw.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / active.len() as f64; active.len()]
        };

        let mut buy = 0.0;
        let mut sell = 0.0;
        let mut hold = 0.0;
        for (vote, weight) in active.iter().zip(normalized.iter()) {
            let mass = weight * vote.confidence / 100.0;
            match vote.action {
                TradeAction::Buy => buy += mass,
                TradeAction::Sell => sell += mass,
                TradeAction::Hold => hold += mass,
            }
        }

        // Argmax with ties breaking toward HOLD.
        let action = if buy > sell && buy > hold {
            TradeAction::Buy
        } else if sell > buy && sell > hold {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };

        let supporters: Vec<&&ProviderDecision> =
            active.iter().filter(|v| v.action == action).collect();
        let confidence = if supporters.is_empty() {
            0.0
        } else {
            supporters.iter().map(|v| v.confidence).sum::<f64>() / supporters.len() as f64
        };
        let reasoning = supporters
            .iter()
            .map(|v| format!("{}: {}", v.provider, v.reasoning))
            .collect::<Vec<_>>()
            .join("; ");

        metadata.dissenting = active
            .iter()
            .filter(|v| v.action != action)
            .map(|v| format!("{}: {}", v.provider, v.reasoning))
            .collect();
        metadata.votes = BTreeMap::from([
            ("BUY".to_string(), buy),
            ("SELL".to_string(), sell),
            ("HOLD".to_string(), hold),
        ]);

        debug!(
            "DecisionAggregator: Vote BUY={:.3} SELL={:.3} HOLD={:.3} -> {}",
            buy, sell, hold, action
        );

        (action, confidence, reasoning, all, metadata)
    }

    async fn decide_stacking(
        &self,
        ctx: &DecisionContext,
    ) -> (TradeAction, f64, String, Vec<ProviderDecision>, EnsembleMetadata) {
        let all = self.query_all(ctx).await;
        let active: Vec<&ProviderDecision> = all.iter().filter(|v| !v.is_errored()).collect();

        let mut metadata = EnsembleMetadata::new(self.strategy.as_str());
        metadata.errored_providers = all
            .iter()
            .filter(|v| v.is_errored())
            .map(|v| v.provider.clone())
            .collect();

        if active.is_empty() {
            metadata.quorum = QuorumStatus::Insufficient;
            self.metrics.quorum_failures_total.inc();
            return (
                TradeAction::Hold,
                0.0,
                "insufficient quorum".to_string(),
                all,
                metadata,
            );
        }

        let features = stacking::MetaFeatures::compute(&active);
        let (action, confidence) = self.meta_learner.predict(&features);
        let reasoning = format!(
            "meta-learner {}: {} from {} base votes (agreement {:.2}, mean confidence {:.1})",
            self.meta_learner.name(),
            action,
            active.len(),
            features.agreement_ratio,
            features.confidence_mean
        );

        (action, confidence.clamp(0.0, 100.0), reasoning, all, metadata)
    }

    async fn decide_debate(
        &self,
        ctx: &DecisionContext,
    ) -> (TradeAction, f64, String, Vec<ProviderDecision>, EnsembleMetadata) {
        let Some(plan) = self.debate.as_ref() else {
            // Unreachable: the plan is resolved at construction.
            let mut metadata = EnsembleMetadata::new(self.strategy.as_str());
            metadata.quorum = QuorumStatus::Insufficient;
            return (
                TradeAction::Hold,
                0.0,
                "debate plan missing".to_string(),
                vec![],
                metadata,
            );
        };

        let round = plan.run(ctx, self.provider_timeout).await;
        let mut metadata = EnsembleMetadata::new(self.strategy.as_str());
        metadata.errored_providers = round
            .all_votes()
            .iter()
            .filter(|v| v.is_errored())
            .map(|v| v.provider.clone())
            .collect();

        for vote in round.all_votes() {
            if vote.is_errored() {
                self.metrics
                    .provider_errors_total
                    .with_label_values(&[&vote.provider])
                    .inc();
            }
        }

        match &round.judge {
            Some(judge) => {
                let reasoning = debate::compose_reasoning(judge, &round);
                (
                    judge.action,
                    judge.confidence,
                    reasoning,
                    round.all_votes(),
                    metadata,
                )
            }
            None => {
                metadata.quorum = QuorumStatus::Insufficient;
                self.metrics.quorum_failures_total.inc();
                let (action, confidence) = debate::fallback_action();
                (
                    action,
                    confidence,
                    "debate incomplete".to_string(),
                    round.all_votes(),
                    metadata,
                )
            }
        }
    }

    /// Fan out to every provider concurrently; results come back in the
    /// aggregator's stable provider order.
    async fn query_all(&self, ctx: &DecisionContext) -> Vec<ProviderDecision> {
        join_all(
            self.providers
                .iter()
                .map(|provider| self.query_one(provider, ctx)),
        )
        .await
    }

    async fn query_one(
        &self,
        provider: &Arc<dyn DecisionProvider>,
        ctx: &DecisionContext,
    ) -> ProviderDecision {
        let vote = debate::query_role(provider, ctx, self.provider_timeout).await;
        if vote.is_errored() {
            self.metrics
                .provider_errors_total
                .with_label_values(&[&vote.provider])
                .inc();
            warn!(
                "DecisionAggregator: Provider {} errored: {:?}",
                vote.provider, vote.error
            );
        }
        self.metrics
            .provider_latency_seconds
            .with_label_values(&[&vote.provider])
            .observe(vote.latency_ms as f64 / 1000.0);
        vote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetClass;
    use crate::domain::market::VolatilityRegime;
    use crate::infrastructure::mock::{ScriptedProvider, ScriptedReply};
    use rust_decimal_macros::dec;

    fn market() -> MarketContext {
        MarketContext {
            asset: AssetPair::new("BTC/USD").unwrap(),
            asset_class: AssetClass::Crypto,
            last_price: dec!(50000),
            candles: HashMap::new(),
            indicators: HashMap::new(),
            regime: VolatilityRegime::Ranging,
            realized_volatility: 0.01,
            captured_at: Utc::now(),
            source: "mock".to_string(),
        }
    }

    fn portfolio() -> PortfolioSnapshot {
        let mut balances = HashMap::new();
        balances.insert("USD".to_string(), dec!(100000));
        PortfolioSnapshot {
            balances,
            positions: vec![],
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            realized_pnl_today: Decimal::ZERO,
            captured_at: Utc::now(),
        }
    }

    fn defaults() -> DecisionDefaults {
        DecisionDefaults {
            suggested_size: dec!(1),
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        }
    }

    fn config(strategy: EnsembleStrategyKind, providers: &[&str]) -> EnsembleEnvConfig {
        let providers: Vec<String> = providers.iter().map(|s| s.to_string()).collect();
        let weights = EnsembleEnvConfig::uniform_weights(&providers);
        EnsembleEnvConfig {
            strategy,
            providers,
            weights,
            debate_roles: None,
            provider_timeout_secs: 1,
            aggregator_timeout_secs: 2,
        }
    }

    fn aggregator(
        strategy: EnsembleStrategyKind,
        providers: Vec<Arc<dyn DecisionProvider>>,
        cfg: Option<EnsembleEnvConfig>,
    ) -> DecisionAggregator {
        let cfg = cfg.unwrap_or_else(|| {
            let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
            let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
            config(strategy, &refs)
        });
        DecisionAggregator::new(
            &cfg,
            providers,
            Arc::new(stacking::ConsensusMetaLearner::default()),
            Metrics::new().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_provider_set_is_fatal() {
        let cfg = config(EnsembleStrategyKind::Weighted, &["a", "b"]);
        let result = DecisionAggregator::new(
            &cfg,
            vec![],
            Arc::new(stacking::ConsensusMetaLearner::default()),
            Metrics::new().unwrap(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_single_strategy_passes_through() {
        let provider: Arc<dyn DecisionProvider> = Arc::new(ScriptedProvider::new(
            "alpha",
            TradeAction::Buy,
            80.0,
            "momentum breakout",
        ));
        let agg = aggregator(EnsembleStrategyKind::Single, vec![provider], None);

        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.confidence, 80.0);
        assert_eq!(decision.ensemble.quorum, QuorumStatus::Met);
    }

    // Weights {a:0.4, b:0.4, c:0.2}; b errors. Renormalized a=2/3, c=1/3:
    // BUY = 0.467, SELL = 0.2 -> BUY wins at the winners' mean confidence.
    #[tokio::test]
    async fn test_weighted_vote_with_errored_provider() {
        let a = Arc::new(ScriptedProvider::new("a", TradeAction::Buy, 70.0, "up"));
        let b = Arc::new(ScriptedProvider::new("b", TradeAction::Buy, 0.0, ""));
        b.push_reply(ScriptedReply::Fail(
            crate::domain::errors::EngineError::transient("unreachable"),
        ))
        .await;
        let c = Arc::new(ScriptedProvider::new("c", TradeAction::Sell, 60.0, "down"));

        let mut cfg = config(EnsembleStrategyKind::Weighted, &["a", "b", "c"]);
        cfg.weights =
            HashMap::from([("a".into(), 0.4), ("b".into(), 0.4), ("c".into(), 0.2)]);

        let providers: Vec<Arc<dyn DecisionProvider>> = vec![a, b, c];
        let agg = aggregator(EnsembleStrategyKind::Weighted, providers, Some(cfg));
        let weights =
            HashMap::from([("a".to_string(), 0.4), ("b".to_string(), 0.4), ("c".to_string(), 0.2)]);

        let decision = agg.decide(market(), portfolio(), &weights, &defaults()).await;

        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.confidence, 70.0);
        assert_eq!(decision.ensemble.errored_providers, vec!["b".to_string()]);
        let buy_mass = decision.ensemble.votes["BUY"];
        assert!((buy_mass - 0.4667).abs() < 0.001, "BUY mass {}", buy_mass);
        assert!(!decision.ensemble.dissenting.is_empty());
    }

    #[tokio::test]
    async fn test_tie_breaks_toward_hold() {
        let a = Arc::new(ScriptedProvider::new("a", TradeAction::Buy, 60.0, "up"));
        let b = Arc::new(ScriptedProvider::new("b", TradeAction::Sell, 60.0, "down"));
        let providers: Vec<Arc<dyn DecisionProvider>> = vec![a, b];
        let agg = aggregator(EnsembleStrategyKind::Majority, providers, None);

        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.suggested_size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_insufficient_quorum_returns_hold() {
        let a = Arc::new(ScriptedProvider::new("a", TradeAction::Buy, 90.0, "up"));
        let b = Arc::new(ScriptedProvider::new("b", TradeAction::Buy, 90.0, "up"));
        b.push_reply(ScriptedReply::Fail(
            crate::domain::errors::EngineError::transient("down"),
        ))
        .await;

        let providers: Vec<Arc<dyn DecisionProvider>> = vec![a, b];
        let agg = aggregator(EnsembleStrategyKind::Weighted, providers, None);
        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.ensemble.quorum, QuorumStatus::Insufficient);
        assert_eq!(decision.reasoning, "insufficient quorum");
    }

    #[tokio::test]
    async fn test_provider_timeout_counts_as_errored() {
        let slow = Arc::new(
            ScriptedProvider::new("slow", TradeAction::Buy, 90.0, "up")
                .with_delay(Duration::from_secs(5)),
        );
        let fast = Arc::new(ScriptedProvider::new("fast", TradeAction::Sell, 60.0, "dn"));

        let providers: Vec<Arc<dyn DecisionProvider>> = vec![slow, fast];
        let agg = aggregator(EnsembleStrategyKind::Weighted, providers, None);
        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        // Timeout leaves a single live provider: insufficient quorum.
        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.ensemble.errored_providers, vec!["slow".to_string()]);
    }

    #[tokio::test]
    async fn test_debate_judge_cites_both_advocates() {
        let bull = Arc::new(ScriptedProvider::new(
            "bull-llm",
            TradeAction::Buy,
            80.0,
            "momentum favors upside",
        ));
        let bear = Arc::new(ScriptedProvider::new(
            "bear-llm",
            TradeAction::Sell,
            70.0,
            "divergence warns of a top",
        ));
        let judge = Arc::new(ScriptedProvider::new(
            "judge-llm",
            TradeAction::Hold,
            55.0,
            "both sides have merit; staying flat",
        ));

        let mut cfg = config(
            EnsembleStrategyKind::Debate,
            &["bear-llm", "bull-llm", "judge-llm"],
        );
        cfg.debate_roles = Some(crate::config::DebateRolesConfig {
            bull: "bull-llm".to_string(),
            bear: "bear-llm".to_string(),
            judge: "judge-llm".to_string(),
        });

        let providers: Vec<Arc<dyn DecisionProvider>> = vec![bull, bear, judge];
        let agg = aggregator(EnsembleStrategyKind::Debate, providers, Some(cfg));
        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.confidence, 55.0);
        assert!(decision.reasoning.contains("momentum favors upside"));
        assert!(decision.reasoning.contains("divergence warns of a top"));
    }

    #[tokio::test]
    async fn test_stacking_uses_meta_learner() {
        let a = Arc::new(ScriptedProvider::new("a", TradeAction::Buy, 80.0, "up"));
        let b = Arc::new(ScriptedProvider::new("b", TradeAction::Buy, 70.0, "up"));
        let c = Arc::new(ScriptedProvider::new("c", TradeAction::Sell, 40.0, "dn"));

        let providers: Vec<Arc<dyn DecisionProvider>> = vec![a, b, c];
        let agg = aggregator(EnsembleStrategyKind::Stacking, providers, None);
        let decision = agg
            .decide(market(), portfolio(), &HashMap::new(), &defaults())
            .await;

        assert_eq!(decision.action, TradeAction::Buy);
        assert!(decision.reasoning.contains("meta-learner"));
    }
}
