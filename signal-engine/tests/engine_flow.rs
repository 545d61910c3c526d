use async_trait::async_trait;
use common::{
    Candle, EmittedSignal, OutcomeClassification, Regime, SignalDirection, StrategyRecommendation, SubscriberTier,
};
use rust_decimal::prelude::*;
use signal_engine::{EngineConfig, EngineParts, SignalEngine};
use signal_generation::{
    CycleOutcome, MarketDataSource, Stage, StageResult, StrategyContext, StrategySource, TierDelivery, WeightLookup,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedMarket {
    candles: Vec<Candle>,
    prices: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedMarket {
    fn uptrend(prices: &[f64]) -> Self {
        let candles = (0..200)
            .map(|i| {
                let close = 100.0 * 1.002f64.powi(i);
                Candle {
                    timestamp: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH + chrono::Duration::minutes(i as i64),
                    open: close,
                    high: close * 1.001,
                    low: close * 0.999,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect();
        Self {
            candles,
            prices: Mutex::new(prices.iter().copied().collect()),
            last: Mutex::new(prices.first().copied().unwrap_or(100.0)),
        }
    }

    fn without_candles(price: f64) -> Self {
        Self {
            candles: Vec::new(),
            ..Self::uptrend(&[price])
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn recent_candles(&self, _symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>> {
        if self.candles.is_empty() {
            anyhow::bail!("no candles");
        }
        let start = self.candles.len().saturating_sub(count);
        Ok(self.candles[start..].to_vec())
    }

    async fn current_price(&self, _symbol: &str) -> anyhow::Result<Decimal> {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.prices.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(Decimal::from_f64(*last).unwrap())
    }
}

struct FixedVotes(Vec<(&'static str, SignalDirection, f64)>);

#[async_trait]
impl StrategySource for FixedVotes {
    async fn recommendations(&self, _context: &StrategyContext) -> Vec<StrategyRecommendation> {
        self.0
            .iter()
            .map(|(id, direction, confidence)| StrategyRecommendation::new(*id, *direction, *confidence))
            .collect()
    }
}

#[derive(Default)]
struct RecordingDelivery(Mutex<Vec<(SubscriberTier, EmittedSignal)>>);

#[async_trait]
impl TierDelivery for RecordingDelivery {
    async fn deliver(&self, tier: SubscriberTier, signal: &EmittedSignal) -> anyhow::Result<()> {
        self.0.lock().unwrap().push((tier, signal.clone()));
        Ok(())
    }
}

fn five_longs() -> FixedVotes {
    FixedVotes(vec![
        ("momentum_surge", SignalDirection::Long, 80.0),
        ("trend_following", SignalDirection::Long, 75.0),
        ("breakout", SignalDirection::Long, 70.0),
        ("order_flow", SignalDirection::Long, 65.0),
        ("volume_spike", SignalDirection::Long, 60.0),
    ])
}

fn config(symbols: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.outcome.poll_interval_ms = 1_000;
    config
}

fn engine(
    config: EngineConfig,
    market: ScriptedMarket,
    votes: FixedVotes,
) -> (SignalEngine, Arc<RecordingDelivery>) {
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = SignalEngine::build(
        config,
        EngineParts {
            market: Arc::new(market),
            strategies: Arc::new(votes),
            delivery: delivery.clone(),
            sinks: Vec::new(),
        },
    )
    .unwrap();
    (engine, delivery)
}

#[tokio::test(start_paused = true)]
async fn test_agreeing_strategies_signal_win_and_feedback() {
    // Entry at 150, then a jump through every target
    let market = ScriptedMarket::uptrend(&[150.0, 150.2, 160.0]);
    let (mut engine, delivery) = engine(config(&["BTCUSDT"]), market, five_longs());

    let reports = engine.run_cycle().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].regime.regime, Regime::StrongUpMomentum);
    assert!(matches!(reports[0].outcome, CycleOutcome::Enqueued { .. }));

    // First emission for every tier goes out immediately
    {
        let delivered = delivery.0.lock().unwrap();
        assert_eq!(delivered.len(), SubscriberTier::ALL.len());
        assert!(delivered.iter().all(|(_, s)| s.symbol == "BTCUSDT" && s.strategy_id == "momentum_surge"));
    }

    tokio::time::sleep(Duration::from_secs(10)).await;

    let ledger = engine.tracker().ledger();
    assert_eq!(ledger.len(), 1);
    let record = ledger.records().remove(0);
    assert_eq!(record.classification, OutcomeClassification::WinT3);
    assert!(record.realized_return_pct > 0.0);

    let weight = engine.pipeline().weights().weight("momentum_surge", Regime::StrongUpMomentum);
    assert!((weight - 1.05).abs() < 1e-12);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.pipeline.count(Stage::Gate, StageResult::Accepted), 1);
    assert_eq!(snapshot.pipeline.count(Stage::Distribution, StageResult::Accepted), 3);
    assert_eq!(snapshot.tiers.len(), SubscriberTier::ALL.len());
    for tier in SubscriberTier::ALL {
        let stats = snapshot.tiers[&tier.to_string()];
        assert_eq!(stats.emitted, 1, "{tier}");
        assert_eq!(stats.failed, 0, "{tier}");
    }
    assert_eq!(snapshot.outcome_counts["win_t3"], 1);
    let text = engine.render_prometheus().unwrap();
    assert!(text.contains("pipeline_stage_total"));
    assert!(text.contains("stage=\"distribution\""));
}

#[tokio::test(start_paused = true)]
async fn test_split_vote_emits_nothing() {
    let votes = FixedVotes(vec![
        ("range_bounce", SignalDirection::Long, 50.0),
        ("breakout", SignalDirection::Short, 50.0),
    ]);
    let (mut engine, delivery) = engine(config(&["ETHUSDT"]), ScriptedMarket::without_candles(100.0), votes);

    let reports = engine.run_cycle().await;

    assert_eq!(reports[0].regime.regime, Regime::Choppy);
    assert_eq!(reports[0].outcome, CycleOutcome::NoConsensus);
    assert!(delivery.0.lock().unwrap().is_empty());
    assert!(engine.tracker().ledger().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_every_signal_resolves_by_time_barrier() {
    let mut config = config(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    config.pipeline.signal_ttl_minutes = 1;
    let (mut engine, _) = engine(config, ScriptedMarket::uptrend(&[150.0]), five_longs());

    engine.run_cycle().await;
    let tracker = engine.tracker();
    assert_eq!(tracker.active_count(), 3);

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(tracker.active_count(), 0);
    let records = tracker.ledger().records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.classification.is_timeout()));
}

#[tokio::test(start_paused = true)]
async fn test_drain_invalidates_open_signals() {
    let (mut engine, _) = engine(config(&["BTCUSDT"]), ScriptedMarket::uptrend(&[150.0]), five_longs());
    engine.run_cycle().await;

    let records = engine.drain().await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].classification, OutcomeClassification::Invalidated);
    assert!(engine.pipeline().weights().is_empty());
}
