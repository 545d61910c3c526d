//! Two-level priority scheduler between the router and the quality gate
//!
//! HIGH items are always served before MEDIUM items. Every successful
//! enqueue, whatever its priority, is followed by `pump()`, which makes one
//! dequeue-and-invoke attempt on the registered consumer. Ordering is decided
//! by `dequeue_next`, never by whether the enqueue triggered processing, so a
//! MEDIUM item can never be stranded waiting for a HIGH insertion.

use crate::context::MarketContext;
use chrono::{DateTime, Utc};
use common::{Priority, RoutedDecision};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub high_capacity: usize,
    pub medium_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_capacity: 64,
            medium_capacity: 256,
        }
    }
}

/// A routed decision waiting for the quality gate
#[derive(Debug, Clone)]
pub struct QueuedSignal {
    pub routed: RoutedDecision,
    pub context: MarketContext,
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedSignal {
    pub fn priority(&self) -> Priority {
        self.routed.priority
    }
}

/// Receives items dequeued by `pump`
pub trait QueueConsumer: Send + Sync {
    fn consume(&self, item: QueuedSignal);
}

#[derive(Debug, Clone, Copy)]
pub struct EnqueueReceipt {
    pub sequence: u64,
    /// Decision evicted to make room, if the tier was full
    pub dropped: Option<Uuid>,
    /// Whether the triggered pump reached a consumer
    pub dispatched: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_high: usize,
    pub pending_medium: usize,
    pub enqueued_high: u64,
    pub enqueued_medium: u64,
    pub dropped_high: u64,
    pub dropped_medium: u64,
    pub dispatched: u64,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<QueuedSignal>,
    medium: VecDeque<QueuedSignal>,
    next_sequence: u64,
}

#[derive(Default)]
struct QueueCounters {
    enqueued_high: AtomicU64,
    enqueued_medium: AtomicU64,
    dropped_high: AtomicU64,
    dropped_medium: AtomicU64,
    dispatched: AtomicU64,
}

pub struct SignalQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    consumer: RwLock<Option<Arc<dyn QueueConsumer>>>,
    counters: QueueCounters,
}

impl SignalQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: QueueConfig {
                high_capacity: config.high_capacity.max(1),
                medium_capacity: config.medium_capacity.max(1),
            },
            state: Mutex::new(QueueState::default()),
            consumer: RwLock::new(None),
            counters: QueueCounters::default(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // A consumer panic never happens under this lock, but recover anyway
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_consumer(&self) -> Option<Arc<dyn QueueConsumer>> {
        match self.consumer.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Register the consumer and drain anything already pending
    pub fn register_consumer(&self, consumer: Arc<dyn QueueConsumer>) {
        match self.consumer.write() {
            Ok(mut guard) => *guard = Some(consumer),
            Err(poisoned) => *poisoned.into_inner() = Some(consumer),
        }
        let mut drained = 0usize;
        while self.pump() {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Drained pending items into new consumer");
        }
    }

    /// Add a routed decision, then pump once.
    pub fn enqueue(&self, routed: RoutedDecision, context: MarketContext) -> EnqueueReceipt {
        let priority = routed.priority;
        let (sequence, dropped) = {
            let mut state = self.lock_state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let item = QueuedSignal {
                routed,
                context,
                sequence,
                enqueued_at: Utc::now(),
            };

            let (tier, capacity, enqueued, dropped_counter) = match priority {
                Priority::High => (
                    &mut state.high,
                    self.config.high_capacity,
                    &self.counters.enqueued_high,
                    &self.counters.dropped_high,
                ),
                Priority::Medium => (
                    &mut state.medium,
                    self.config.medium_capacity,
                    &self.counters.enqueued_medium,
                    &self.counters.dropped_medium,
                ),
            };

            let mut dropped = None;
            if tier.len() >= capacity {
                if let Some(oldest) = tier.pop_front() {
                    dropped_counter.fetch_add(1, Ordering::Relaxed);
                    dropped = Some(oldest.routed.decision.id);
                    warn!(
                        priority = %priority,
                        decision_id = %oldest.routed.decision.id,
                        "Queue tier full, dropped oldest"
                    );
                }
            }
            tier.push_back(item);
            enqueued.fetch_add(1, Ordering::Relaxed);
            (sequence, dropped)
        };

        // Always pump, regardless of priority
        let dispatched = self.pump();

        EnqueueReceipt {
            sequence,
            dropped,
            dispatched,
        }
    }

    /// One dequeue-and-invoke attempt. Returns true if the consumer was invoked.
    pub fn pump(&self) -> bool {
        let Some(consumer) = self.current_consumer() else {
            return false;
        };
        let Some(item) = self.dequeue_next() else {
            return false;
        };
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        consumer.consume(item);
        true
    }

    /// Next item in strict HIGH-then-MEDIUM order, FIFO within a tier
    pub fn dequeue_next(&self) -> Option<QueuedSignal> {
        let mut state = self.lock_state();
        if let Some(item) = state.high.pop_front() {
            return Some(item);
        }
        let item = state.medium.pop_front()?;
        if !state.high.is_empty() {
            // Unreachable while both tiers share one lock
            error!(decision_id = %item.routed.decision.id, "Medium item served while high pending");
            debug_assert!(state.high.is_empty(), "medium served while high pending");
        }
        Some(item)
    }

    pub fn pending(&self) -> usize {
        let state = self.lock_state();
        state.high.len() + state.medium.len()
    }

    pub fn stats(&self) -> QueueStats {
        let (pending_high, pending_medium) = {
            let state = self.lock_state();
            (state.high.len(), state.medium.len())
        };
        QueueStats {
            pending_high,
            pending_medium,
            enqueued_high: self.counters.enqueued_high.load(Ordering::Relaxed),
            enqueued_medium: self.counters.enqueued_medium.load(Ordering::Relaxed),
            dropped_high: self.counters.dropped_high.load(Ordering::Relaxed),
            dropped_medium: self.counters.dropped_medium.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
        }
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::{ConsensusDecision, QualityTier, Regime, TradeDirection, VolatilityBucket};

    pub(crate) fn routed(priority: Priority) -> RoutedDecision {
        RoutedDecision {
            decision: ConsensusDecision {
                id: Uuid::new_v4(),
                symbol: "BTCUSDT".to_string(),
                direction: TradeDirection::Long,
                weighted_confidence: 0.7,
                long_share: 0.8,
                agreement_score: 0.8,
                adjusted_confidence: 75.0,
                adjusted_agreement: 80.0,
                voting_strategies: vec!["s1".to_string(), "s2".to_string()],
                total_voters: 2,
                primary_strategy: "s1".to_string(),
                quality_tier: match priority {
                    Priority::High => QualityTier::High,
                    Priority::Medium => QualityTier::Medium,
                },
                regime_at_decision: Regime::RangeBullish,
                regime_confidence: 0.8,
                decided_at: Utc::now(),
            },
            priority,
            routing_reason: "test".to_string(),
        }
    }

    fn context() -> MarketContext {
        MarketContext::new("BTCUSDT", None, None, VolatilityBucket::Normal)
    }

    #[derive(Default)]
    struct Recorder {
        served: Mutex<Vec<(Priority, u64)>>,
    }

    impl QueueConsumer for Recorder {
        fn consume(&self, item: QueuedSignal) {
            self.served.lock().unwrap().push((item.priority(), item.sequence));
        }
    }

    #[test]
    fn test_medium_enqueue_alone_triggers_consumer() {
        let queue = SignalQueue::default();
        let recorder = Arc::new(Recorder::default());
        queue.register_consumer(recorder.clone());

        let receipt = queue.enqueue(routed(Priority::Medium), context());

        assert!(receipt.dispatched);
        assert_eq!(recorder.served.lock().unwrap().len(), 1);
        assert_eq!(recorder.served.lock().unwrap()[0].0, Priority::Medium);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_high_served_before_medium() {
        let queue = SignalQueue::default();
        queue.enqueue(routed(Priority::Medium), context());
        queue.enqueue(routed(Priority::High), context());
        queue.enqueue(routed(Priority::Medium), context());
        queue.enqueue(routed(Priority::High), context());

        let order: Vec<(Priority, u64)> = std::iter::from_fn(|| queue.dequeue_next())
            .map(|i| (i.priority(), i.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::High, 1),
                (Priority::High, 3),
                (Priority::Medium, 0),
                (Priority::Medium, 2)
            ]
        );
    }

    #[test]
    fn test_register_drains_pending() {
        let queue = SignalQueue::default();
        for _ in 0..3 {
            assert!(!queue.enqueue(routed(Priority::Medium), context()).dispatched);
        }
        queue.enqueue(routed(Priority::High), context());

        let recorder = Arc::new(Recorder::default());
        queue.register_consumer(recorder.clone());

        let served = recorder.served.lock().unwrap().clone();
        assert_eq!(served.len(), 4);
        assert_eq!(served[0].0, Priority::High);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = SignalQueue::new(QueueConfig {
            high_capacity: 2,
            medium_capacity: 2,
        });
        let first = routed(Priority::Medium);
        let first_id = first.decision.id;
        queue.enqueue(first, context());
        queue.enqueue(routed(Priority::Medium), context());
        let receipt = queue.enqueue(routed(Priority::Medium), context());

        assert_eq!(receipt.dropped, Some(first_id));
        let stats = queue.stats();
        assert_eq!(stats.dropped_medium, 1);
        assert_eq!(stats.pending_medium, 2);
        assert_eq!(stats.enqueued_medium, 3);
        assert_eq!(queue.dequeue_next().unwrap().sequence, 1);
    }

    #[test]
    fn test_random_interleavings_never_serve_medium_over_pending_high() {
        let mut rng = fastrand::Rng::with_seed(42);

        for _ in 0..50 {
            let queue = SignalQueue::default();
            let mut pending_high = 0usize;
            let mut pending_medium = 0usize;
            for _ in 0..200 {
                match rng.u32(0..100) {
                    0..=29 => {
                        queue.enqueue(routed(Priority::High), context());
                        pending_high += 1;
                    }
                    30..=64 => {
                        queue.enqueue(routed(Priority::Medium), context());
                        pending_medium += 1;
                    }
                    _ => match queue.dequeue_next() {
                        Some(item) if item.priority() == Priority::Medium => {
                            assert_eq!(pending_high, 0, "medium served while high pending");
                            pending_medium -= 1;
                        }
                        Some(_) => pending_high -= 1,
                        None => assert_eq!(pending_high + pending_medium, 0),
                    },
                }
            }
        }
    }

    #[test]
    fn test_concurrent_enqueues_all_dispatched() {
        let queue = Arc::new(SignalQueue::default());
        let recorder = Arc::new(Recorder::default());
        queue.register_consumer(recorder.clone());

        std::thread::scope(|scope| {
            for t in 0..4 {
                let queue = queue.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        let priority = if (t + i) % 3 == 0 { Priority::High } else { Priority::Medium };
                        queue.enqueue(routed(priority), context());
                    }
                });
            }
        });

        assert_eq!(recorder.served.lock().unwrap().len(), 100);
        assert_eq!(queue.stats().dispatched, 100);
        assert_eq!(queue.pending(), 0);
    }
}
