//! Triple-barrier outcome classification
//!
//! A signal resolves on the first observation that touches a target (win, by
//! the furthest target touched) or the stop (loss). If neither happens before
//! the time barrier, the path since entry decides which timeout label applies.

use chrono::Utc;
use common::{EmittedSignal, OutcomeClassification, OutcomeRecord, TradeDirection};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use signal_generation::MarketDataSource;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub poll_interval_ms: u64,
    pub price_timeout_ms: u64,
    /// Path range (high - low over entry) under which a timeout is low volatility
    pub low_volatility_range_pct: f64,
    /// Final displacement within this band of entry counts as no movement
    pub stagnation_band_pct: f64,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            price_timeout_ms: 2_000,
            low_volatility_range_pct: 0.002,
            stagnation_band_pct: 0.001,
        }
    }
}

/// Price barriers around an entry
#[derive(Debug, Clone, PartialEq)]
pub struct TripleBarrier {
    pub direction: TradeDirection,
    pub entry: f64,
    pub stop_loss: f64,
    /// Nearest first
    pub targets: Vec<f64>,
}

impl TripleBarrier {
    pub fn from_signal(signal: &EmittedSignal) -> Option<Self> {
        let entry = signal.entry.to_f64()?;
        let stop_loss = signal.stop_loss.to_f64()?;
        let targets = signal
            .targets
            .iter()
            .map(|t| t.to_f64())
            .collect::<Option<Vec<f64>>>()?;
        (entry > 0.0 && !targets.is_empty()).then_some(Self {
            direction: signal.direction,
            entry,
            stop_loss,
            targets,
        })
    }

    /// Signed return from entry in percent
    pub fn return_pct(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry) / self.entry * 100.0
    }

    /// Barrier touched by a single observation, if any
    pub fn touch(&self, price: f64) -> Option<OutcomeClassification> {
        let reached = |level: f64| match self.direction {
            TradeDirection::Long => price >= level,
            TradeDirection::Short => price <= level,
        };

        let furthest = self.targets.iter().rposition(|&t| reached(t));
        if let Some(index) = furthest {
            return Some(match index {
                0 => OutcomeClassification::WinT1,
                1 => OutcomeClassification::WinT2,
                _ => OutcomeClassification::WinT3,
            });
        }

        let stopped = match self.direction {
            TradeDirection::Long => price <= self.stop_loss,
            TradeDirection::Short => price >= self.stop_loss,
        };
        stopped.then_some(OutcomeClassification::Loss)
    }
}

/// Price path observed while a signal is open
#[derive(Debug, Clone, Copy)]
struct PathRange {
    high: f64,
    low: f64,
    last: f64,
    observations: usize,
}

impl PathRange {
    fn new(entry: f64) -> Self {
        Self {
            high: entry,
            low: entry,
            last: entry,
            observations: 0,
        }
    }

    fn observe(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.last = price;
        self.observations += 1;
    }
}

pub struct OutcomeClassifier {
    config: OutcomeConfig,
}

impl OutcomeClassifier {
    pub fn new(config: OutcomeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutcomeConfig {
        &self.config
    }

    fn timeout_class(&self, barrier: &TripleBarrier, path: &PathRange) -> OutcomeClassification {
        let range = (path.high - path.low) / barrier.entry;
        if range < self.config.low_volatility_range_pct {
            return OutcomeClassification::TimeoutLowVolatility;
        }
        let displacement = barrier.return_pct(path.last) / 100.0;
        if displacement < -self.config.stagnation_band_pct {
            OutcomeClassification::TimeoutWrongDirection
        } else if displacement > self.config.stagnation_band_pct {
            OutcomeClassification::TimeoutValidSlow
        } else {
            OutcomeClassification::TimeoutStagnation
        }
    }

    /// Classify a complete path that ends at the time barrier.
    ///
    /// Returns the label and the realised return in percent.
    pub fn classify_path<I>(&self, barrier: &TripleBarrier, prices: I) -> (OutcomeClassification, f64)
    where
        I: IntoIterator<Item = f64>,
    {
        let mut path = PathRange::new(barrier.entry);
        for price in prices {
            if !price.is_finite() {
                continue;
            }
            path.observe(price);
            if let Some(class) = barrier.touch(price) {
                return (class, barrier.return_pct(price));
            }
        }
        (self.timeout_class(barrier, &path), barrier.return_pct(path.last))
    }

    /// Poll prices for `signal` until a barrier is touched, the time barrier
    /// passes, or `cancel` flips to true. Always returns exactly one record.
    pub async fn track(
        &self,
        signal: &EmittedSignal,
        market: &dyn MarketDataSource,
        time_barrier: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> OutcomeRecord {
        let resolve = |classification: OutcomeClassification, realized_return_pct: f64| OutcomeRecord {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            strategy_id: signal.strategy_id.clone(),
            regime: signal.regime,
            classification,
            realized_return_pct,
            training_value: classification.training_value(),
            resolved_at: Utc::now(),
        };

        let Some(barrier) = TripleBarrier::from_signal(signal) else {
            warn!(signal_id = %signal.id, "Signal has unusable levels, invalidating");
            return resolve(OutcomeClassification::Invalidated, 0.0);
        };

        if *cancel.borrow() {
            return resolve(OutcomeClassification::Invalidated, 0.0);
        }

        let deadline = tokio::time::sleep_until(Instant::now() + time_barrier);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let price_timeout = Duration::from_millis(self.config.price_timeout_ms);
        let mut path = PathRange::new(barrier.entry);
        let mut cancellable = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    let class = self.timeout_class(&barrier, &path);
                    debug!(
                        signal_id = %signal.id,
                        outcome = class.as_str(),
                        observations = path.observations,
                        "Time barrier reached"
                    );
                    return resolve(class, barrier.return_pct(path.last));
                }
                changed = cancel.changed(), if cancellable => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            debug!(signal_id = %signal.id, "Outcome tracking cancelled");
                            return resolve(OutcomeClassification::Invalidated, barrier.return_pct(path.last));
                        }
                        Ok(()) => {}
                        // Sender gone, nobody can cancel any more
                        Err(_) => cancellable = false,
                    }
                }
                price = async {
                    ticker.tick().await;
                    self.fetch(signal, market, price_timeout).await
                } => {
                    if let Some(price) = price {
                        path.observe(price);
                        if let Some(class) = barrier.touch(price) {
                            debug!(signal_id = %signal.id, outcome = class.as_str(), price, "Barrier touched");
                            return resolve(class, barrier.return_pct(price));
                        }
                    }
                }
            }
        }
    }

    async fn fetch(&self, signal: &EmittedSignal, market: &dyn MarketDataSource, timeout: Duration) -> Option<f64> {
        match tokio::time::timeout(timeout, market.current_price(&signal.symbol)).await {
            Ok(Ok(price)) => price.to_f64().filter(|p| p.is_finite()),
            Ok(Err(e)) => {
                warn!(signal_id = %signal.id, symbol = %signal.symbol, error = %e, "Outcome price fetch failed");
                None
            }
            Err(_) => {
                warn!(signal_id = %signal.id, symbol = %signal.symbol, "Outcome price fetch timed out");
                None
            }
        }
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(OutcomeConfig::default())
    }
}
