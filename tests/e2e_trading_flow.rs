//! End-to-end flow through the full engine: decision, risk gate, execution,
//! tracking, take-profit close, and outcome feedback.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sagetrade::application::aggregator::stacking::ConsensusMetaLearner;
use sagetrade::application::system::{Engine, ExternalServices};
use sagetrade::config::Config;
use sagetrade::domain::asset::AssetPair;
use sagetrade::domain::decision::{CloseReason, TradeAction};
use sagetrade::domain::market::Candle;
use sagetrade::domain::ports::{AutoApprove, DecisionProvider};
use sagetrade::infrastructure::mock::{MockMarketData, MockTradingPlatform, ScriptedProvider};
use sagetrade::infrastructure::store::DecisionFilter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_for<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn flat_candles(price: f64, n: usize) -> Vec<Candle> {
    let p = Decimal::try_from(price).unwrap();
    (0..n)
        .map(|i| Candle {
            open: p,
            high: p,
            low: p,
            close: p,
            volume: dec!(100),
            timestamp: i as i64 * 60,
        })
        .collect()
}

fn fast_test_config(tag: &str) -> Config {
    let mut config = Config::default();
    config.agent.analysis_frequency_secs = 1;
    config.agent.max_daily_trades = 1;
    config.monitor.pnl_check_interval_secs = 1;
    config.monitor.portfolio_check_interval_secs = 1;
    config.decisions_dir = std::env::temp_dir()
        .join(format!("sagetrade-e2e-{}-{}", tag, Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    config.memory_path = std::env::temp_dir()
        .join(format!("sagetrade-e2e-{}-{}.jsonl", tag, Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    config
}

#[tokio::test]
async fn test_single_bullish_decision_happy_path() {
    let config = fast_test_config("happy");
    let asset = AssetPair::new("BTC/USD").unwrap();

    let market = Arc::new(MockMarketData::new());
    market.set_price(&asset, dec!(100)).await;
    market.set_candles(&asset, flat_candles(100.0, 50)).await;

    let platform = Arc::new(MockTradingPlatform::new(Arc::clone(&market), dec!(100000)));
    let provider: Arc<dyn DecisionProvider> = Arc::new(ScriptedProvider::new(
        "local",
        TradeAction::Buy,
        80.0,
        "momentum breakout",
    ));

    let engine = Engine::build(
        config,
        ExternalServices {
            platform: Arc::clone(&platform) as Arc<dyn sagetrade::domain::ports::TradingPlatform>,
            market_data: Arc::clone(&market) as Arc<dyn sagetrade::domain::ports::MarketDataProvider>,
            providers: vec![provider],
            approval: Arc::new(AutoApprove),
            meta_learner: Arc::new(ConsensusMetaLearner::default()),
        },
    )
    .await
    .unwrap();

    let _agent = engine.start();

    // A position opens off the bullish signal
    let opened = wait_for(
        || {
            let platform = Arc::clone(&platform);
            async move { platform.position_count().await == 1 }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(opened, "expected a position to open");

    let decisions = engine
        .store
        .list(&DecisionFilter::default(), 10)
        .await
        .unwrap();
    let decision = decisions
        .iter()
        .find(|d| d.action == TradeAction::Buy)
        .expect("buy decision persisted");
    assert_eq!(decision.approved, Some(true));
    assert_eq!(decision.confidence, 80.0);

    // Price drifts through the 4% take-profit
    market.set_price(&asset, dec!(105)).await;

    let decision_id = decision.id;
    let store = Arc::clone(&engine.store);
    let closed = wait_for(
        || {
            let store = Arc::clone(&store);
            async move {
                matches!(
                    store.get(decision_id).await,
                    Ok(Some(d)) if d.outcome.is_some()
                )
            }
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(closed, "expected the outcome to be appended");

    let terminal = engine.store.get(decision_id).await.unwrap().unwrap();
    let outcome = terminal.outcome.unwrap();
    assert_eq!(outcome.closed_by, CloseReason::TakeProfit);
    assert_eq!(outcome.decision_id, decision_id);
    assert!(outcome.realized_pnl > Decimal::ZERO);
    assert_eq!(platform.position_count().await, 0);

    // Outcome feedback reached the portfolio memory
    assert!(engine.memory.lock().await.outcomes_recorded() >= 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_hold_never_attaches_a_tracker() {
    let config = fast_test_config("hold");
    let asset = AssetPair::new("BTC/USD").unwrap();

    let market = Arc::new(MockMarketData::new());
    market.set_price(&asset, dec!(100)).await;
    market.set_candles(&asset, flat_candles(100.0, 50)).await;

    let platform = Arc::new(MockTradingPlatform::new(Arc::clone(&market), dec!(100000)));
    let provider: Arc<dyn DecisionProvider> = Arc::new(ScriptedProvider::new(
        "local",
        TradeAction::Hold,
        95.0,
        "wait and see",
    ));

    let engine = Engine::build(
        config,
        ExternalServices {
            platform: Arc::clone(&platform) as Arc<dyn sagetrade::domain::ports::TradingPlatform>,
            market_data: Arc::clone(&market) as Arc<dyn sagetrade::domain::ports::MarketDataProvider>,
            providers: vec![provider],
            approval: Arc::new(AutoApprove),
            meta_learner: Arc::new(ConsensusMetaLearner::default()),
        },
    )
    .await
    .unwrap();

    let _agent = engine.start();

    // Give the loop a few cycles; HOLD must never consume a slot
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(platform.position_count().await, 0);
    assert_eq!(engine.monitor.active_count().await, 0);

    engine.shutdown().await;
}
