//! Engine wiring: pipeline cycles, distribution and outcome tracking

use crate::config::EngineConfig;
use crate::simulated::SimulatedMarket;
use crate::strategies::default_panel;
use anyhow::Context;
use async_trait::async_trait;
use common::{EmittedSignal, OutcomeRecord, SubscriberTier};
use monitoring::{
    EngineSnapshot, FeedbackLoop, LoggingSink, MetricsSurface, OutcomeClassifier, OutcomeLedger, OutcomeSink,
    OutcomeTracker,
};
use signal_generation::{
    CycleOutcome, CycleReport, DistributionScheduler, MarketDataSource, SignalPipeline, StrategySource, TierDelivery,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delivery that writes each tier emission to the log
pub struct LoggingDelivery;

#[async_trait]
impl TierDelivery for LoggingDelivery {
    async fn deliver(&self, tier: SubscriberTier, signal: &EmittedSignal) -> anyhow::Result<()> {
        info!(
            tier = %tier,
            signal_id = %signal.id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            entry = %signal.entry,
            stop = %signal.stop_loss,
            confidence = signal.confidence,
            "Signal delivered"
        );
        Ok(())
    }
}

/// External collaborators the engine is built around
pub struct EngineParts {
    pub market: Arc<dyn MarketDataSource>,
    pub strategies: Arc<dyn StrategySource>,
    pub delivery: Arc<dyn TierDelivery>,
    pub sinks: Vec<Arc<dyn OutcomeSink>>,
}

pub struct SignalEngine {
    config: EngineConfig,
    pipeline: Arc<SignalPipeline>,
    signals: mpsc::UnboundedReceiver<EmittedSignal>,
    scheduler: Arc<DistributionScheduler>,
    tracker: Arc<OutcomeTracker>,
    surface: MetricsSurface,
    tracking: Vec<JoinHandle<Option<OutcomeRecord>>>,
}

impl SignalEngine {
    pub fn build(config: EngineConfig, parts: EngineParts) -> anyhow::Result<Self> {
        config.validate()?;

        let (pipeline, signals) = SignalPipeline::new(config.pipeline.clone(), parts.market.clone(), parts.strategies)
            .context("Failed to build signal pipeline")?;
        let pipeline = Arc::new(pipeline);

        let ledger = Arc::new(OutcomeLedger::new());
        let feedback = Arc::new(FeedbackLoop::new(
            config.feedback.clone(),
            pipeline.weights(),
            pipeline.history(),
        ));
        let mut tracker = OutcomeTracker::new(
            Arc::new(OutcomeClassifier::new(config.outcome.clone())),
            parts.market,
            ledger.clone(),
            feedback,
        );
        for sink in parts.sinks {
            tracker = tracker.add_sink(sink);
        }

        let scheduler = Arc::new(
            DistributionScheduler::new(config.distribution.clone(), parts.delivery)
                .with_metrics(pipeline.metrics()),
        );
        let surface = MetricsSurface::new(
            pipeline.metrics(),
            pipeline.queue(),
            scheduler.clone(),
            pipeline.weights(),
            ledger,
        );

        Ok(Self {
            config,
            pipeline,
            signals,
            scheduler,
            tracker: Arc::new(tracker),
            surface,
            tracking: Vec::new(),
        })
    }

    /// Engine over the simulated market with the built-in strategies
    pub fn simulated(config: EngineConfig) -> anyhow::Result<Self> {
        let market = Arc::new(SimulatedMarket::new(config.simulation.clone()));
        let strategies = Arc::new(default_panel(Duration::from_millis(config.strategy_timeout_ms)));
        Self::build(
            config,
            EngineParts {
                market,
                strategies,
                delivery: Arc::new(LoggingDelivery),
                sinks: vec![Arc::new(LoggingSink)],
            },
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> Arc<SignalPipeline> {
        self.pipeline.clone()
    }

    pub fn tracker(&self) -> Arc<OutcomeTracker> {
        self.tracker.clone()
    }

    pub fn scheduler(&self) -> Arc<DistributionScheduler> {
        self.scheduler.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.surface.snapshot()
    }

    pub fn render_prometheus(&self) -> anyhow::Result<String> {
        Ok(self.surface.render_prometheus()?)
    }

    /// Run one cycle over every configured symbol and hand accepted signals on
    pub async fn run_cycle(&mut self) -> Vec<CycleReport> {
        let reports = self.pipeline.run_symbols(&self.config.symbols).await;
        for report in &reports {
            if let CycleOutcome::Failed(reason) = &report.outcome {
                warn!(symbol = %report.symbol, reason = %reason, "Cycle failed");
            }
        }
        let dispatched = self.dispatch_signals().await;
        debug!(symbols = reports.len(), dispatched, "Cycle complete");
        reports
    }

    /// Every accepted signal is tracked, whether or not a tier emits it
    async fn dispatch_signals(&mut self) -> usize {
        self.tracking.retain(|handle| !handle.is_finished());
        let mut dispatched = 0;
        while let Ok(signal) = self.signals.try_recv() {
            self.tracking.push(self.tracker.spawn(signal.clone()));
            self.scheduler.submit(signal).await;
            dispatched += 1;
        }
        dispatched
    }

    /// Cancel open tracking and wait for every outcome to be recorded
    pub async fn drain(&mut self) -> Vec<OutcomeRecord> {
        let cancelled = self.tracker.invalidate_all();
        if cancelled > 0 {
            info!(cancelled, "Invalidated open signals");
        }
        let mut records = Vec::new();
        for handle in self.tracking.drain(..) {
            match handle.await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Outcome task failed"),
            }
        }
        records
    }

    /// Cycle on an interval until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            symbols = ?self.config.symbols,
            interval_secs = self.config.cycle_interval_secs,
            "Signal engine running"
        );
        let timers = tokio::spawn(self.scheduler.clone().run(shutdown.clone()));
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cycle_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.run_cycle().await;
                    let enqueued = reports
                        .iter()
                        .filter(|r| matches!(r.outcome, CycleOutcome::Enqueued { .. }))
                        .count();
                    let snapshot = self.snapshot();
                    info!(
                        enqueued,
                        open_signals = self.tracker.active_count(),
                        resolved = snapshot.outcome_counts.values().sum::<u64>(),
                        "Cycle finished"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let records = self.drain().await;
        timers.await.context("Distribution timers failed")?;
        info!(resolved = records.len(), "Signal engine stopped");
        debug!(snapshot = %serde_json::to_string(&self.snapshot())?, "Final snapshot");
        Ok(())
    }
}
