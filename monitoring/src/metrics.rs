use chrono::{DateTime, Utc};
use common::OutcomeRecord;
use serde::{Deserialize, Serialize};
use signal_generation::{
    DistributionScheduler, PipelineMetrics, PipelineSnapshot, QueueStats, SignalQueue, StrategyWeight,
    StrategyWeightTable, TierStats,
};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ledger::OutcomeLedger;

/// Resolved-signal performance for one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// Labelled outcomes; invalidated signals are excluded
    pub total_signals: usize,
    pub wins: usize,
    pub losses: usize,
    pub timeouts: usize,
    pub hit_rate: f64,
    pub total_return_pct: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_pct: f64,
    pub avg_training_value: f64,
}

/// Performance Calculator - computes per-strategy metrics from resolved outcomes
pub struct PerformanceCalculator {
    risk_free_return_pct: f64, // Per-signal risk-free return for Sharpe
}

impl PerformanceCalculator {
    pub fn new(risk_free_return_pct: f64) -> Self {
        Self { risk_free_return_pct }
    }

    /// Calculate metrics for one strategy over the given records
    pub fn calculate_strategy_metrics(&self, strategy_id: &str, records: &[OutcomeRecord]) -> StrategyPerformance {
        let mut outcomes: Vec<&OutcomeRecord> = records
            .iter()
            .filter(|r| r.strategy_id == strategy_id && r.training_value.is_some())
            .collect();
        outcomes.sort_by_key(|r| r.resolved_at);

        let returns: Vec<f64> = outcomes.iter().map(|r| r.realized_return_pct).collect();
        let wins = outcomes.iter().filter(|r| r.classification.is_win()).count();
        let losses = outcomes
            .iter()
            .filter(|r| r.classification == common::OutcomeClassification::Loss)
            .count();
        let timeouts = outcomes.iter().filter(|r| r.classification.is_timeout()).count();
        let total_signals = outcomes.len();

        let hit_rate = if total_signals > 0 {
            wins as f64 / total_signals as f64 * 100.0
        } else {
            0.0
        };

        let positive: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).map(f64::abs).collect();
        let avg_win_pct = average(&positive);
        let avg_loss_pct = average(&negative);
        let gross_loss: f64 = negative.iter().sum();
        let profit_factor = if gross_loss > 0.0 {
            positive.iter().sum::<f64>() / gross_loss
        } else {
            0.0
        };

        let avg_training_value = average(&outcomes.iter().filter_map(|r| r.training_value).collect::<Vec<_>>());

        StrategyPerformance {
            strategy_id: strategy_id.to_string(),
            period_start: outcomes.first().map(|r| r.resolved_at),
            period_end: outcomes.last().map(|r| r.resolved_at),
            total_signals,
            wins,
            losses,
            timeouts,
            hit_rate,
            total_return_pct: returns.iter().sum(),
            avg_win_pct,
            avg_loss_pct,
            profit_factor,
            sharpe_ratio: self.calculate_sharpe_ratio(&returns),
            max_drawdown_pct: calculate_max_drawdown(&returns),
            avg_training_value,
        }
    }

    /// Metrics for every strategy that appears in the records
    pub fn calculate_all(&self, records: &[OutcomeRecord]) -> Vec<StrategyPerformance> {
        let mut ids: Vec<&str> = records.iter().map(|r| r.strategy_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .map(|id| self.calculate_strategy_metrics(id, records))
            .collect()
    }

    /// Per-signal Sharpe ratio, not annualised
    fn calculate_sharpe_ratio(&self, returns: &[f64]) -> Option<f64> {
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.mean();
        let std_dev = returns.std_dev();
        (std_dev > 0.0).then(|| (mean - self.risk_free_return_pct) / std_dev)
    }

    /// Compare two strategies over the same records
    pub fn compare_strategies(&self, strategy_a: &str, strategy_b: &str, records: &[OutcomeRecord]) -> StrategyComparison {
        let metrics_a = self.calculate_strategy_metrics(strategy_a, records);
        let metrics_b = self.calculate_strategy_metrics(strategy_b, records);

        let winner = if metrics_a.total_signals == 0 && metrics_b.total_signals == 0 {
            None
        } else if metrics_a.total_return_pct >= metrics_b.total_return_pct {
            Some(strategy_a.to_string())
        } else {
            Some(strategy_b.to_string())
        };

        StrategyComparison {
            strategy_a: strategy_a.to_string(),
            strategy_b: strategy_b.to_string(),
            metrics_a,
            metrics_b,
            winner,
        }
    }
}

impl Default for PerformanceCalculator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Largest peak-to-trough fall of the cumulative return, in percentage points
fn calculate_max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    for r in returns {
        cumulative += r;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }
    max_drawdown
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub strategy_a: String,
    pub strategy_b: String,
    pub metrics_a: StrategyPerformance,
    pub metrics_b: StrategyPerformance,
    pub winner: Option<String>,
}

/// Everything the engine exposes for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub pipeline: PipelineSnapshot,
    pub queue: QueueStats,
    /// Distribution counts per subscriber tier
    pub tiers: BTreeMap<String, TierStats>,
    pub weights: Vec<StrategyWeight>,
    pub outcome_counts: BTreeMap<String, u64>,
    pub strategies: Vec<StrategyPerformance>,
}

/// Read-only view over the pipeline's shared state
pub struct MetricsSurface {
    pipeline: Arc<PipelineMetrics>,
    queue: Arc<SignalQueue>,
    scheduler: Arc<DistributionScheduler>,
    weights: Arc<StrategyWeightTable>,
    ledger: Arc<OutcomeLedger>,
    calculator: PerformanceCalculator,
}

impl MetricsSurface {
    pub fn new(
        pipeline: Arc<PipelineMetrics>,
        queue: Arc<SignalQueue>,
        scheduler: Arc<DistributionScheduler>,
        weights: Arc<StrategyWeightTable>,
        ledger: Arc<OutcomeLedger>,
    ) -> Self {
        Self {
            pipeline,
            queue,
            scheduler,
            weights,
            ledger,
            calculator: PerformanceCalculator::default(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let records = self.ledger.records();
        EngineSnapshot {
            taken_at: Utc::now(),
            pipeline: self.pipeline.snapshot(),
            queue: self.queue.stats(),
            tiers: self.scheduler.all_stats(),
            weights: self.weights.snapshot(),
            outcome_counts: self.ledger.counts(),
            strategies: self.calculator.calculate_all(&records),
        }
    }

    /// Prometheus text exposition of the pipeline registry
    pub fn render_prometheus(&self) -> prometheus::Result<String> {
        self.pipeline.gather_text()
    }
}
