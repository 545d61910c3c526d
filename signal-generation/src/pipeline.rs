// Signal Consensus Pipeline
// Runs one symbol's cycle: regime -> consensus -> router -> queue -> gate

use crate::consensus::{ConsensusConfig, ConsensusEngine};
use crate::context::MarketContext;
use crate::history::OutcomeHistory;
use crate::indicators;
use crate::metrics::{PipelineMetrics, Stage, StageResult};
use crate::quality::{QualityGate, QualityGateConfig};
use crate::queue::{QueueConfig, QueueConsumer, QueuedSignal, SignalQueue};
use crate::regime::{RegimeClassifier, RegimeConfig, RegimeProfileTable};
use crate::router::{PriorityRouter, RouterConfig, RouterRejection, RoutingOutcome};
use crate::sources::{MarketDataSource, StrategyContext, StrategySource};
use crate::weights::{StrategyWeightTable, WeightConfig};
use chrono::{Duration as ChronoDuration, Utc};
use common::{
    Candle, EmittedSignal, PipelineError, PipelineResult, Priority, RegimeAssessment, Uuid,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for the whole consensus pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candles requested per cycle
    pub candle_count: usize,
    /// Candles the regime classifier looks at
    pub lookback: usize,
    pub atr_period: usize,
    /// Bound on every market data fetch
    pub fetch_timeout_ms: u64,
    pub signal_ttl_minutes: i64,
    /// Outcomes kept per strategy for the gate's trailing win-rate
    pub history_window: usize,
    pub regime: RegimeConfig,
    pub profiles: RegimeProfileTable,
    pub consensus: ConsensusConfig,
    pub router: RouterConfig,
    pub queue: QueueConfig,
    pub gate: QualityGateConfig,
    pub weights: WeightConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            candle_count: 200,
            lookback: 100,
            atr_period: 14,
            fetch_timeout_ms: 2_000,
            signal_ttl_minutes: 240,
            history_window: 50,
            regime: RegimeConfig::default(),
            profiles: RegimeProfileTable::default(),
            consensus: ConsensusConfig::default(),
            router: RouterConfig::default(),
            queue: QueueConfig::default(),
            gate: QualityGateConfig::default(),
            weights: WeightConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.candle_count < self.lookback {
            return Err(PipelineError::Config(format!(
                "candle_count {} is smaller than lookback {}",
                self.candle_count, self.lookback
            )));
        }
        if self.signal_ttl_minutes <= 0 {
            return Err(PipelineError::Config("signal_ttl_minutes must be positive".to_string()));
        }
        self.gate.levels.validate()?;
        self.profiles.validate()?;
        self.weights.validate()
    }
}

/// How far one symbol's cycle got
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NoConsensus,
    RouterRejected(RouterRejection),
    Enqueued {
        decision_id: Uuid,
        priority: Priority,
        sequence: u64,
    },
    /// The cycle itself broke; other symbols are unaffected
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub symbol: String,
    pub regime: RegimeAssessment,
    /// Whether the regime came from live data or the neutral fallback
    pub regime_degraded: bool,
    pub recommendations: usize,
    pub outcome: CycleOutcome,
}

/// Runs queued decisions through the quality gate and forwards the survivors
struct GateConsumer {
    gate: QualityGate,
    metrics: Arc<PipelineMetrics>,
    signal_ttl: ChronoDuration,
    output: mpsc::UnboundedSender<EmittedSignal>,
}

impl QueueConsumer for GateConsumer {
    fn consume(&self, item: QueuedSignal) {
        let QueuedSignal { routed, context, .. } = item;
        let verdict = self.gate.evaluate(&routed, &context);
        self.metrics.record(Stage::Gate, StageResult::Evaluated);
        if !verdict.passed {
            self.metrics.record(Stage::Gate, StageResult::Rejected);
            return;
        }

        let decision = routed.decision;
        let Some(levels) = context.levels(decision.direction, &self.gate.config().levels) else {
            // The gate only passes decisions with computable levels
            error!(decision_id = %decision.id, "Gate passed a decision without trade levels");
            self.metrics.record(Stage::Gate, StageResult::Failed);
            return;
        };

        let now = Utc::now();
        let signal = EmittedSignal {
            id: Uuid::new_v4(),
            decision_id: decision.id,
            symbol: decision.symbol,
            direction: decision.direction,
            entry: levels.entry,
            stop_loss: levels.stop_loss,
            targets: levels.targets,
            confidence: decision.adjusted_confidence,
            quality_score: verdict.quality_score,
            priority: routed.priority,
            regime: decision.regime_at_decision,
            strategy_id: decision.primary_strategy,
            contributing_strategies: decision.voting_strategies,
            created_at: now,
            expires_at: now + self.signal_ttl,
        };

        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            entry = %signal.entry,
            quality = verdict.quality_score,
            priority = %signal.priority,
            "Signal accepted"
        );
        self.metrics.record(Stage::Gate, StageResult::Accepted);
        if self.output.send(signal).is_err() {
            warn!("Signal receiver dropped, accepted signal discarded");
        }
    }
}

/// Signal consensus pipeline
pub struct SignalPipeline {
    config: PipelineConfig,
    market: Arc<dyn MarketDataSource>,
    strategies: Arc<dyn StrategySource>,
    classifier: RegimeClassifier,
    consensus: ConsensusEngine,
    router: PriorityRouter,
    queue: Arc<SignalQueue>,
    weights: Arc<StrategyWeightTable>,
    history: Arc<OutcomeHistory>,
    metrics: Arc<PipelineMetrics>,
    /// Last classification computed from real candles; the neutral fallback never lands here
    live_regimes: DashMap<String, RegimeAssessment>,
}

impl SignalPipeline {
    /// Build the pipeline. Accepted signals arrive on the returned receiver.
    pub fn new(
        config: PipelineConfig,
        market: Arc<dyn MarketDataSource>,
        strategies: Arc<dyn StrategySource>,
    ) -> PipelineResult<(Self, mpsc::UnboundedReceiver<EmittedSignal>)> {
        config.validate()?;

        let weights = Arc::new(StrategyWeightTable::new(config.weights.clone())?);
        let history = Arc::new(OutcomeHistory::new(config.history_window));
        let metrics = Arc::new(
            PipelineMetrics::new()
                .map_err(|e| PipelineError::Config(format!("metrics registry: {}", e)))?,
        );
        let queue = Arc::new(SignalQueue::new(config.queue.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        queue.register_consumer(Arc::new(GateConsumer {
            gate: QualityGate::new(config.gate.clone(), history.clone()),
            metrics: metrics.clone(),
            signal_ttl: ChronoDuration::minutes(config.signal_ttl_minutes),
            output: tx,
        }));

        let pipeline = Self {
            classifier: RegimeClassifier::new(config.regime.clone()),
            consensus: ConsensusEngine::new(
                config.consensus.clone(),
                Arc::new(config.profiles.clone()),
            ),
            router: PriorityRouter::new(config.router.clone()),
            config,
            market,
            strategies,
            queue,
            weights,
            history,
            metrics,
            live_regimes: DashMap::new(),
        };
        info!("Signal pipeline initialised");
        Ok((pipeline, rx))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Weight table shared with the feedback loop
    pub fn weights(&self) -> Arc<StrategyWeightTable> {
        self.weights.clone()
    }

    /// Outcome history shared with the feedback loop
    pub fn history(&self) -> Arc<OutcomeHistory> {
        self.history.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn queue(&self) -> Arc<SignalQueue> {
        self.queue.clone()
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.config.fetch_timeout_ms)
    }

    async fn fetch_candles(&self, symbol: &str) -> Vec<Candle> {
        let fetch = self.market.recent_candles(symbol, self.config.candle_count);
        match tokio::time::timeout(self.fetch_timeout(), fetch).await {
            Ok(Ok(candles)) => candles,
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Candle fetch failed");
                Vec::new()
            }
            Err(_) => {
                warn!(symbol, timeout_ms = self.config.fetch_timeout_ms, "Candle fetch timed out");
                Vec::new()
            }
        }
    }

    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match tokio::time::timeout(self.fetch_timeout(), self.market.current_price(symbol)).await {
            Ok(Ok(price)) => Some(price),
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Price fetch failed");
                None
            }
            Err(_) => {
                warn!(symbol, timeout_ms = self.config.fetch_timeout_ms, "Price fetch timed out");
                None
            }
        }
    }

    /// Classify the regime, falling back to neutral on missing data
    fn assess_regime(&self, symbol: &str, candles: &[Candle]) -> (RegimeAssessment, bool) {
        let previous = self.live_regimes.get(symbol).map(|r| *r);
        self.metrics.record(Stage::Regime, StageResult::Evaluated);
        match self.classifier.classify(candles, self.config.lookback, previous.as_ref()) {
            Ok(assessment) => {
                self.live_regimes.insert(symbol.to_string(), assessment);
                (assessment, false)
            }
            Err(e) => {
                self.metrics.record(Stage::Regime, StageResult::Failed);
                warn!(symbol, error = %e, "Regime unavailable, using neutral");
                (RegimeAssessment::neutral(), true)
            }
        }
    }

    /// Run one cycle for `symbol`
    pub async fn run_cycle(&self, symbol: &str) -> CycleReport {
        let candles = self.fetch_candles(symbol).await;
        let (regime, regime_degraded) = self.assess_regime(symbol, &candles);
        self.metrics.set_regime(symbol, regime);

        let candles = Arc::new(candles);
        let context = StrategyContext {
            symbol: symbol.to_string(),
            candles: candles.clone(),
            regime,
        };
        let recommendations = self.strategies.recommendations(&context).await;

        let report = |outcome: CycleOutcome| CycleReport {
            symbol: symbol.to_string(),
            regime,
            regime_degraded,
            recommendations: recommendations.len(),
            outcome,
        };

        self.metrics.record(Stage::Consensus, StageResult::Evaluated);
        let Some(decision) =
            self.consensus
                .compute_consensus(symbol, &recommendations, &regime, self.weights.as_ref())
        else {
            self.metrics.record(Stage::Consensus, StageResult::Rejected);
            return report(CycleOutcome::NoConsensus);
        };
        self.metrics.record(Stage::Consensus, StageResult::Accepted);

        self.metrics.record(Stage::Router, StageResult::Evaluated);
        let routed = match self.router.route(decision, regime.volatility_bucket, regime.confidence) {
            RoutingOutcome::Routed(routed) => {
                self.metrics.record(Stage::Router, StageResult::Routed);
                routed
            }
            RoutingOutcome::Rejected(reason) => {
                self.metrics.record(Stage::Router, StageResult::Rejected);
                return report(CycleOutcome::RouterRejected(reason));
            }
        };

        let price = self.fetch_price(symbol).await;
        let atr = indicators::average_true_range(&candles, self.config.atr_period);
        let market_context = MarketContext::new(symbol, price, atr, regime.volatility_bucket);

        let decision_id = routed.decision.id;
        let priority = routed.priority;
        let receipt = self.queue.enqueue(routed, market_context);
        self.metrics.record(Stage::Queue, StageResult::Accepted);
        if receipt.dropped.is_some() {
            self.metrics.record(Stage::Queue, StageResult::Rejected);
        }
        debug!(symbol, decision_id = %decision_id, priority = %priority, "Decision enqueued");

        report(CycleOutcome::Enqueued {
            decision_id,
            priority,
            sequence: receipt.sequence,
        })
    }

    /// Run cycles for all symbols concurrently. A failing cycle does not
    /// affect the others.
    pub async fn run_symbols(self: &Arc<Self>, symbols: &[String]) -> Vec<CycleReport> {
        let handles: Vec<_> = symbols
            .iter()
            .map(|symbol| {
                let pipeline = self.clone();
                let symbol = symbol.clone();
                tokio::spawn(async move { pipeline.run_cycle(&symbol).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        symbols
            .iter()
            .zip(results)
            .map(|(symbol, result)| match result {
                Ok(report) => report,
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Cycle task failed");
                    self.metrics.record(Stage::Regime, StageResult::Failed);
                    CycleReport {
                        symbol: symbol.clone(),
                        regime: RegimeAssessment::neutral(),
                        regime_degraded: true,
                        recommendations: 0,
                        outcome: CycleOutcome::Failed(e.to_string()),
                    }
                }
            })
            .collect()
    }
}
