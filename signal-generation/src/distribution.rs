//! Per-tier distribution scheduler
//!
//! Gate-passed signals are buffered for every subscriber tier. When a tier's
//! interval has elapsed, the best unexpired buffered signal is delivered and the
//! rest are discarded. At most one emission per tier per interval, even when a
//! timer tick and a submit race each other.

use crate::metrics::{PipelineMetrics, Stage, StageResult};
use async_trait::async_trait;
use chrono::Utc;
use common::{EmittedSignal, SubscriberTier, Uuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub free_interval_secs: u64,
    pub pro_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Per-tier buffer size; the lowest-confidence signal is evicted when full
    pub buffer_capacity: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            free_interval_secs: 3600,
            pro_interval_secs: 900,
            max_interval_secs: 300,
            buffer_capacity: 32,
        }
    }
}

impl DistributionConfig {
    pub fn interval(&self, tier: SubscriberTier) -> Duration {
        let secs = match tier {
            SubscriberTier::Free => self.free_interval_secs,
            SubscriberTier::Pro => self.pro_interval_secs,
            SubscriberTier::Max => self.max_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

/// Delivers one signal to every subscriber of a tier
#[async_trait]
pub trait TierDelivery: Send + Sync {
    async fn deliver(&self, tier: SubscriberTier, signal: &EmittedSignal) -> anyhow::Result<()>;
}

/// Result of one scheduling check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionCheck {
    Emitted(Uuid),
    /// Another check for this tier is in flight
    Busy,
    IntervalNotElapsed,
    Empty,
    AllExpired,
    /// Delivery failed; the interval is still consumed
    DeliveryFailed(Uuid),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub buffered: usize,
    pub emitted: u64,
    pub discarded: u64,
    pub failed: u64,
}

struct TierSlot {
    tier: SubscriberTier,
    interval: Duration,
    buffer: Mutex<Vec<EmittedSignal>>,
    in_flight: AtomicBool,
    last_emission: Mutex<Option<Instant>>,
    emitted: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl TierSlot {
    fn new(tier: SubscriberTier, interval: Duration) -> Self {
        Self {
            tier,
            interval,
            buffer: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            last_emission: Mutex::new(None),
            emitted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

/// Clears the in-flight flag when the check finishes or is cancelled
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DistributionScheduler {
    config: DistributionConfig,
    slots: Vec<TierSlot>,
    delivery: Arc<dyn TierDelivery>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl DistributionScheduler {
    pub fn new(config: DistributionConfig, delivery: Arc<dyn TierDelivery>) -> Self {
        let slots = SubscriberTier::ALL
            .iter()
            .map(|&tier| TierSlot::new(tier, config.interval(tier)))
            .collect();
        Self {
            config,
            slots,
            delivery,
            metrics: None,
        }
    }

    /// Count emissions, discards and failures under the distribution stage
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, result: StageResult, count: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_n(Stage::Distribution, result, count);
        }
    }

    fn slot(&self, tier: SubscriberTier) -> &TierSlot {
        // slots are built from SubscriberTier::ALL in declaration order
        &self.slots[tier as usize]
    }

    /// Buffer a signal for every tier and run a check on each.
    pub async fn submit(&self, signal: EmittedSignal) -> Vec<(SubscriberTier, EmissionCheck)> {
        let capacity = self.config.buffer_capacity.max(1);
        for slot in &self.slots {
            let mut buffer = slot.buffer.lock().unwrap_or_else(|p| p.into_inner());
            if buffer.len() >= capacity {
                if let Some((idx, _)) = buffer
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence))
                {
                    buffer.swap_remove(idx);
                    slot.discarded.fetch_add(1, Ordering::Relaxed);
                    self.record(StageResult::Rejected, 1);
                }
            }
            buffer.push(signal.clone());
        }

        let checks =
            SubscriberTier::ALL.map(|tier| async move { (tier, self.check_tier(tier).await) });
        futures::future::join_all(checks).await
    }

    /// Emit the best buffered signal for `tier` if its interval has elapsed.
    pub async fn check_tier(&self, tier: SubscriberTier) -> EmissionCheck {
        let slot = self.slot(tier);
        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return EmissionCheck::Busy;
        }
        let _guard = InFlightGuard(&slot.in_flight);

        let now = Instant::now();
        {
            let last = slot.last_emission.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(previous) = *last {
                if now.duration_since(previous) < slot.interval {
                    return EmissionCheck::IntervalNotElapsed;
                }
            }
        }

        let candidates =
            std::mem::take(&mut *slot.buffer.lock().unwrap_or_else(|p| p.into_inner()));
        if candidates.is_empty() {
            return EmissionCheck::Empty;
        }
        self.record(StageResult::Evaluated, 1);
        let total = candidates.len() as u64;
        let wall_clock = Utc::now();
        let best = candidates
            .into_iter()
            .filter(|s| !s.is_expired(wall_clock))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        let Some(best) = best else {
            slot.discarded.fetch_add(total, Ordering::Relaxed);
            self.record(StageResult::Rejected, total);
            debug!(tier = %tier, discarded = total, "All buffered signals expired");
            return EmissionCheck::AllExpired;
        };
        slot.discarded.fetch_add(total - 1, Ordering::Relaxed);
        self.record(StageResult::Rejected, total - 1);

        // Recorded before delivery so a concurrent trigger cannot pass the interval check
        *slot.last_emission.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);

        match self.delivery.deliver(tier, &best).await {
            Ok(()) => {
                slot.emitted.fetch_add(1, Ordering::Relaxed);
                self.record(StageResult::Accepted, 1);
                info!(
                    tier = %tier,
                    signal_id = %best.id,
                    symbol = %best.symbol,
                    confidence = best.confidence,
                    "Signal distributed"
                );
                EmissionCheck::Emitted(best.id)
            }
            Err(e) => {
                slot.failed.fetch_add(1, Ordering::Relaxed);
                self.record(StageResult::Failed, 1);
                warn!(
                    tier = %tier,
                    signal_id = %best.id,
                    error = %e,
                    "Delivery failed, no signal this interval"
                );
                EmissionCheck::DeliveryFailed(best.id)
            }
        }
    }

    pub fn stats(&self, tier: SubscriberTier) -> TierStats {
        let slot = self.slot(tier);
        TierStats {
            buffered: slot.buffer.lock().map(|b| b.len()).unwrap_or(0),
            emitted: slot.emitted.load(Ordering::Relaxed),
            discarded: slot.discarded.load(Ordering::Relaxed),
            failed: slot.failed.load(Ordering::Relaxed),
        }
    }

    /// Stats for every tier, keyed by tier name
    pub fn all_stats(&self) -> BTreeMap<String, TierStats> {
        SubscriberTier::ALL
            .iter()
            .map(|&tier| (tier.to_string(), self.stats(tier)))
            .collect()
    }

    /// Drive timer checks for every tier until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let loops = self.slots.iter().map(|slot| {
            let scheduler = self.clone();
            let mut shutdown = shutdown.clone();
            let tier = slot.tier;
            let period = slot.interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let outcome = scheduler.check_tier(tier).await;
                            debug!(tier = %tier, outcome = ?outcome, "Timer check");
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        });

        for result in futures::future::join_all(loops).await {
            if let Err(e) = result {
                warn!(error = %e, "Distribution timer task failed");
            }
        }
        info!("Distribution scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{Priority, Regime, TradeDirection};
    use rust_decimal_macros::dec;

    fn signal(confidence: f64) -> EmittedSignal {
        let now = Utc::now();
        EmittedSignal {
            id: Uuid::new_v4(),
            decision_id: Uuid::new_v4(),
            symbol: "ETHUSDT".to_string(),
            direction: TradeDirection::Long,
            entry: dec!(100),
            stop_loss: dec!(97),
            targets: vec![dec!(104), dec!(107), dec!(110)],
            confidence,
            quality_score: 70.0,
            priority: Priority::High,
            regime: Regime::StrongUpMomentum,
            strategy_id: "s1".to_string(),
            contributing_strategies: vec!["s1".to_string()],
            created_at: now,
            expires_at: now + ChronoDuration::hours(4),
        }
    }

    #[derive(Default)]
    struct Recorder {
        delay: Duration,
        fail: bool,
        delivered: Mutex<Vec<(SubscriberTier, Uuid)>>,
    }

    #[async_trait]
    impl TierDelivery for Recorder {
        async fn deliver(&self, tier: SubscriberTier, signal: &EmittedSignal) -> anyhow::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("subscriber endpoint unavailable");
            }
            self.delivered.lock().unwrap().push((tier, signal.id));
            Ok(())
        }
    }

    fn count(recorder: &Recorder, tier: SubscriberTier) -> usize {
        recorder.delivered.lock().unwrap().iter().filter(|(t, _)| *t == tier).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_highest_confidence_wins_and_rest_discarded() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = DistributionScheduler::new(DistributionConfig::default(), recorder.clone());

        // First submit emits immediately; the next two only buffer
        scheduler.submit(signal(60.0)).await;
        let weak = signal(65.0);
        let strong = signal(90.0);
        let strong_id = strong.id;
        scheduler.submit(weak).await;
        scheduler.submit(strong).await;
        assert_eq!(scheduler.stats(SubscriberTier::Max).buffered, 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(
            scheduler.check_tier(SubscriberTier::Max).await,
            EmissionCheck::Emitted(strong_id)
        );
        let stats = scheduler.stats(SubscriberTier::Max);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.buffered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_checks_emit_once() {
        let recorder = Arc::new(Recorder {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let scheduler = DistributionScheduler::new(DistributionConfig::default(), recorder.clone());
        {
            let mut buffer = scheduler.slot(SubscriberTier::Pro).buffer.lock().unwrap();
            buffer.push(signal(70.0));
            buffer.push(signal(80.0));
        }

        let (a, b) = tokio::join!(
            scheduler.check_tier(SubscriberTier::Pro),
            scheduler.check_tier(SubscriberTier::Pro)
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|o| matches!(o, EmissionCheck::Emitted(_))).count(), 1);
        assert!(outcomes.contains(&EmissionCheck::Busy));

        // Flag released, but the interval has not elapsed
        scheduler.slot(SubscriberTier::Pro).buffer.lock().unwrap().push(signal(99.0));
        assert_eq!(
            scheduler.check_tier(SubscriberTier::Pro).await,
            EmissionCheck::IntervalNotElapsed
        );
        assert_eq!(count(&recorder, SubscriberTier::Pro), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emissions_bounded_by_interval() {
        let recorder = Arc::new(Recorder::default());
        let config = DistributionConfig {
            free_interval_secs: 100,
            pro_interval_secs: 30,
            max_interval_secs: 7,
            buffer_capacity: 8,
        };
        let scheduler = Arc::new(DistributionScheduler::new(config.clone(), recorder.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timers = tokio::spawn(scheduler.clone().run(shutdown_rx));

        let mut rng = fastrand::Rng::with_seed(7);
        let window = Duration::from_secs(1000);
        let start = Instant::now();
        while start.elapsed() < window {
            scheduler.submit(signal(rng.f64().mul_add(40.0, 50.0))).await;
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        shutdown_tx.send(true).unwrap();
        timers.await.unwrap();

        let elapsed = start.elapsed().as_secs();
        for tier in SubscriberTier::ALL {
            let bound = (elapsed / config.interval(tier).as_secs()) as usize + 1;
            let emitted = count(&recorder, tier);
            assert!(emitted >= 1);
            assert!(emitted <= bound, "{tier}: {emitted} > {bound}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_signals_never_emitted() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = DistributionScheduler::new(DistributionConfig::default(), recorder.clone());
        let mut stale = signal(95.0);
        stale.expires_at = Utc::now() - ChronoDuration::minutes(1);

        let results = scheduler.submit(stale).await;
        assert!(results.iter().all(|(_, r)| *r == EmissionCheck::AllExpired));
        assert!(recorder.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_consumes_interval() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let scheduler = DistributionScheduler::new(DistributionConfig::default(), recorder.clone());
        let s = signal(70.0);
        let id = s.id;

        let results = scheduler.submit(s).await;
        assert!(results.iter().all(|(_, r)| *r == EmissionCheck::DeliveryFailed(id)));
        assert_eq!(scheduler.stats(SubscriberTier::Free).failed, 1);

        let results = scheduler.submit(signal(80.0)).await;
        assert!(results.iter().all(|(_, r)| *r == EmissionCheck::IntervalNotElapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_counts_match_tier_stats() {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let recorder = Arc::new(Recorder::default());
        let scheduler = DistributionScheduler::new(DistributionConfig::default(), recorder.clone())
            .with_metrics(metrics.clone());

        // Each tier emits the first, then buffers two and later keeps the better one
        scheduler.submit(signal(60.0)).await;
        scheduler.submit(signal(65.0)).await;
        scheduler.submit(signal(90.0)).await;
        tokio::time::advance(Duration::from_secs(3601)).await;
        for tier in SubscriberTier::ALL {
            assert!(matches!(scheduler.check_tier(tier).await, EmissionCheck::Emitted(_)));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.count(Stage::Distribution, StageResult::Accepted), 6);
        assert_eq!(snapshot.count(Stage::Distribution, StageResult::Rejected), 3);
        assert_eq!(snapshot.count(Stage::Distribution, StageResult::Failed), 0);

        let stats = scheduler.all_stats();
        assert_eq!(stats.len(), 3);
        let emitted: u64 = stats.values().map(|s| s.emitted).sum();
        let discarded: u64 = stats.values().map(|s| s.discarded).sum();
        assert_eq!(emitted, 6);
        assert_eq!(discarded, 3);
        assert_eq!(stats["max"].emitted, 2);
    }
}
