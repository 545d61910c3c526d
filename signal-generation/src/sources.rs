// Inputs to the pipeline: market data and strategy oracles

use async_trait::async_trait;
use common::{Candle, RegimeAssessment, StrategyRecommendation};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Candle and price feed
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Most recent `count` candles, oldest first
    async fn recent_candles(&self, symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>>;

    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

/// What a strategy sees when asked for a vote
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub symbol: String,
    pub candles: Arc<Vec<Candle>>,
    pub regime: RegimeAssessment,
}

/// A single detector that may vote on a symbol
#[async_trait]
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    /// `Ok(None)` means the strategy has nothing to say this cycle
    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>>;
}

/// Supplies the recommendations for one cycle
#[async_trait]
pub trait StrategySource: Send + Sync {
    async fn recommendations(&self, context: &StrategyContext) -> Vec<StrategyRecommendation>;
}

/// Runs registered strategies concurrently, each with its own deadline
pub struct StrategyPanel {
    strategies: Vec<Arc<dyn Strategy>>,
    timeout: Duration,
    late: AtomicU64,
    failed: AtomicU64,
}

impl StrategyPanel {
    pub fn new(timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            timeout,
            late: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn add_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        info!("Adding strategy: {}", strategy.id());
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategies excluded for missing their deadline
    pub fn late_count(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StrategySource for StrategyPanel {
    async fn recommendations(&self, context: &StrategyContext) -> Vec<StrategyRecommendation> {
        let calls = self.strategies.iter().map(|strategy| async move {
            let result = tokio::time::timeout(self.timeout, strategy.recommend(context)).await;
            (strategy.id(), result)
        });

        let mut recommendations = Vec::new();
        for (id, result) in futures::future::join_all(calls).await {
            match result {
                Ok(Ok(Some(rec))) => recommendations.push(rec),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(strategy = id, symbol = %context.symbol, error = %e, "Strategy failed");
                }
                Err(_) => {
                    self.late.fetch_add(1, Ordering::Relaxed);
                    warn!(strategy = id, symbol = %context.symbol, "Strategy timed out, excluded this cycle");
                }
            }
        }

        debug!(symbol = %context.symbol, votes = recommendations.len(), "Collected recommendations");
        recommendations
    }
}
