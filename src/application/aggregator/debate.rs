//! Debate strategy: bull and bear argue in parallel, a judge rules.

use crate::domain::decision::{
    DebateArgument, DebateRole, DecisionContext, ProviderDecision, TradeAction,
};
use crate::domain::ports::DecisionProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Resolved debate participants. Role names are fixed at construction so a
/// misconfigured ensemble fails before the first cycle.
pub struct DebatePlan {
    pub bull: Arc<dyn DecisionProvider>,
    pub bear: Arc<dyn DecisionProvider>,
    pub judge: Arc<dyn DecisionProvider>,
}

/// Everything a debate produced, errored advocates included.
pub struct DebateRound {
    pub bull: ProviderDecision,
    pub bear: ProviderDecision,
    pub judge: Option<ProviderDecision>,
}

impl DebateRound {
    pub fn all_votes(&self) -> Vec<ProviderDecision> {
        let mut votes = vec![self.bull.clone(), self.bear.clone()];
        if let Some(judge) = &self.judge {
            votes.push(judge.clone());
        }
        votes
    }
}

impl DebatePlan {
    /// Run the full debate. Advocates are queried concurrently; the judge
    /// sees both transcripts plus the base context.
    pub async fn run(&self, ctx: &DecisionContext, timeout: Duration) -> DebateRound {
        let bull_ctx = ctx.clone().with_role(DebateRole::Bull);
        let bear_ctx = ctx.clone().with_role(DebateRole::Bear);

        let (bull, bear) = tokio::join!(
            query_role(&self.bull, &bull_ctx, timeout),
            query_role(&self.bear, &bear_ctx, timeout),
        );

        if bull.is_errored() || bear.is_errored() {
            warn!(
                "Debate: Advocate errored (bull: {:?}, bear: {:?}); skipping judge",
                bull.error, bear.error
            );
            return DebateRound {
                bull,
                bear,
                judge: None,
            };
        }

        let transcripts = vec![
            DebateArgument {
                role: DebateRole::Bull,
                provider: bull.provider.clone(),
                argument: bull.reasoning.clone(),
            },
            DebateArgument {
                role: DebateRole::Bear,
                provider: bear.provider.clone(),
                argument: bear.reasoning.clone(),
            },
        ];
        let judge_ctx = ctx
            .clone()
            .with_role(DebateRole::Judge)
            .with_transcripts(transcripts);

        let judge = query_role(&self.judge, &judge_ctx, timeout).await;
        let judge = if judge.is_errored() { None } else { Some(judge) };

        DebateRound { bull, bear, judge }
    }
}

/// Judge verdict with both advocates' positions embedded, so attribution
/// survives into the persisted decision.
pub fn compose_reasoning(judge: &ProviderDecision, round: &DebateRound) -> String {
    format!(
        "{}\n\nBull ({}): {}\nBear ({}): {}",
        judge.reasoning,
        round.bull.provider,
        round.bull.reasoning,
        round.bear.provider,
        round.bear.reasoning
    )
}

pub(crate) async fn query_role(
    provider: &Arc<dyn DecisionProvider>,
    ctx: &DecisionContext,
    timeout: Duration,
) -> ProviderDecision {
    let start = Instant::now();
    match tokio::time::timeout(timeout, provider.decide(ctx)).await {
        Ok(Ok(mut decision)) => {
            decision.provider = provider.name().to_string();
            decision.confidence = decision.confidence.clamp(0.0, 100.0);
            decision.latency_ms = start.elapsed().as_millis() as u64;
            decision
        }
        Ok(Err(e)) => {
            ProviderDecision::errored(provider.name(), e, start.elapsed().as_millis() as u64)
        }
        Err(_) => ProviderDecision::errored(
            provider.name(),
            "timeout",
            start.elapsed().as_millis() as u64,
        ),
    }
}

/// Debate outcome when any role errored: HOLD, flagged as quorum failure.
pub fn fallback_action() -> (TradeAction, f64) {
    (TradeAction::Hold, 0.0)
}
