//! Outcome tracking for emitted signals
//!
//! Each emitted signal gets its own polling task. Whatever ends the task
//! (barrier touch, time barrier or cancellation) yields exactly one record,
//! which goes to the ledger, the feedback loop and every registered sink.

use crate::feedback::FeedbackLoop;
use crate::ledger::OutcomeLedger;
use crate::outcome::OutcomeClassifier;
use async_trait::async_trait;
use chrono::Utc;
use common::{EmittedSignal, OutcomeRecord, Uuid};
use dashmap::DashMap;
use signal_generation::MarketDataSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receives every resolved outcome
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn on_outcome_resolved(&self, record: &OutcomeRecord) -> anyhow::Result<()>;
}

/// Sink that only logs
pub struct LoggingSink;

#[async_trait]
impl OutcomeSink for LoggingSink {
    async fn on_outcome_resolved(&self, record: &OutcomeRecord) -> anyhow::Result<()> {
        info!(
            signal_id = %record.signal_id,
            symbol = %record.symbol,
            strategy = %record.strategy_id,
            outcome = record.classification.as_str(),
            return_pct = record.realized_return_pct,
            "Outcome resolved"
        );
        Ok(())
    }
}

pub struct OutcomeTracker {
    classifier: Arc<OutcomeClassifier>,
    market: Arc<dyn MarketDataSource>,
    ledger: Arc<OutcomeLedger>,
    feedback: Arc<FeedbackLoop>,
    sinks: Vec<Arc<dyn OutcomeSink>>,
    active: DashMap<Uuid, watch::Sender<bool>>,
}

impl OutcomeTracker {
    pub fn new(
        classifier: Arc<OutcomeClassifier>,
        market: Arc<dyn MarketDataSource>,
        ledger: Arc<OutcomeLedger>,
        feedback: Arc<FeedbackLoop>,
    ) -> Self {
        Self {
            classifier,
            market,
            ledger,
            feedback,
            sinks: Vec::new(),
            active: DashMap::new(),
        }
    }

    pub fn add_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn ledger(&self) -> Arc<OutcomeLedger> {
        self.ledger.clone()
    }

    /// Signals still being tracked
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Start tracking until the signal's own expiry
    pub fn spawn(self: &Arc<Self>, signal: EmittedSignal) -> JoinHandle<Option<OutcomeRecord>> {
        let time_barrier = (signal.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.spawn_with_barrier(signal, time_barrier)
    }

    /// Start tracking with an explicit time barrier
    pub fn spawn_with_barrier(
        self: &Arc<Self>,
        signal: EmittedSignal,
        time_barrier: Duration,
    ) -> JoinHandle<Option<OutcomeRecord>> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.insert(signal.id, cancel_tx);

        let tracker = self.clone();
        tokio::spawn(async move {
            let record = tracker
                .classifier
                .track(&signal, tracker.market.as_ref(), time_barrier, cancel_rx)
                .await;
            tracker.active.remove(&signal.id);
            tracker.resolve(record).await
        })
    }

    /// Cancel tracking; the signal resolves as invalidated. Returns false if
    /// the signal is not being tracked.
    pub fn invalidate(&self, signal_id: &Uuid) -> bool {
        match self.active.get(signal_id) {
            Some(sender) => sender.send(true).is_ok(),
            None => false,
        }
    }

    /// Cancel every active tracking task
    pub fn invalidate_all(&self) -> usize {
        self.active.iter().filter(|entry| entry.value().send(true).is_ok()).count()
    }

    async fn resolve(&self, record: OutcomeRecord) -> Option<OutcomeRecord> {
        if let Err(e) = self.ledger.record(record.clone()) {
            warn!(signal_id = %record.signal_id, error = %e, "Outcome not recorded");
            return None;
        }

        self.feedback.apply(&record);

        for sink in &self.sinks {
            if let Err(e) = sink.on_outcome_resolved(&record).await {
                warn!(signal_id = %record.signal_id, error = %e, "Outcome sink failed");
            }
        }
        Some(record)
    }
}
