//! Per-strategy, per-regime vote weights
//!
//! The table is the only long-lived mutable state in the pipeline. It is
//! passed around by handle; the feedback loop is its only writer and every
//! write happens under the row's shard lock, so increments never interleave.

use common::{PipelineError, PipelineResult, Regime};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Read access used by the consensus engine
pub trait WeightLookup: Send + Sync {
    fn weight(&self, strategy_id: &str, regime: Regime) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Weight of a strategy the table has never seen
    pub default_weight: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            default_weight: 1.0,
            min_weight: 0.25,
            max_weight: 3.0,
        }
    }
}

impl WeightConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        let ordered = 0.0 < self.min_weight
            && self.min_weight <= self.default_weight
            && self.default_weight <= self.max_weight;
        if !ordered || !self.max_weight.is_finite() {
            return Err(PipelineError::Config(format!(
                "weights must satisfy 0 < min ({}) <= default ({}) <= max ({})",
                self.min_weight, self.default_weight, self.max_weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeight {
    pub strategy_id: String,
    pub regime: Regime,
    pub weight: f64,
}

/// Result of one multiplicative update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    pub before: f64,
    pub after: f64,
}

pub struct StrategyWeightTable {
    rows: DashMap<(String, Regime), f64>,
    config: WeightConfig,
}

impl StrategyWeightTable {
    pub fn new(config: WeightConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            rows: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &WeightConfig {
        &self.config
    }

    fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.config.min_weight, self.config.max_weight)
    }

    /// Seed a weight, clamped into range. Returns the stored value.
    pub fn set(&self, strategy_id: &str, regime: Regime, weight: f64) -> PipelineResult<f64> {
        if !weight.is_finite() {
            return Err(PipelineError::invariant(
                "weights",
                format!("non-finite weight for {} in {}", strategy_id, regime),
            ));
        }
        let stored = self.clamp(weight);
        self.rows.insert((strategy_id.to_string(), regime), stored);
        Ok(stored)
    }

    /// Multiply a row's weight by `factor` and clamp.
    ///
    /// The read-modify-write runs while holding the row's entry, so concurrent
    /// updates to the same row are serialised.
    pub fn apply_factor(
        &self,
        strategy_id: &str,
        regime: Regime,
        factor: f64,
    ) -> PipelineResult<WeightUpdate> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(PipelineError::invariant(
                "weights",
                format!("invalid factor {} for {}", factor, strategy_id),
            ));
        }

        let mut entry = self
            .rows
            .entry((strategy_id.to_string(), regime))
            .or_insert(self.config.default_weight);
        let before = *entry;
        let after = self.clamp(before * factor);

        if !(self.config.min_weight..=self.config.max_weight).contains(&after) {
            error!(strategy_id, regime = %regime, after, "Weight escaped clamp");
            return Err(PipelineError::invariant(
                "weights",
                format!("weight {} outside clamp", after),
            ));
        }

        *entry = after;
        debug!(strategy_id, regime = %regime, before, after, "Strategy weight updated");
        Ok(WeightUpdate { before, after })
    }

    /// Sorted copy of every stored row
    pub fn snapshot(&self) -> Vec<StrategyWeight> {
        let mut rows: Vec<StrategyWeight> = self
            .rows
            .iter()
            .map(|r| StrategyWeight {
                strategy_id: r.key().0.clone(),
                regime: r.key().1,
                weight: *r.value(),
            })
            .collect();
        rows.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id).then(a.regime.cmp(&b.regime)));
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for StrategyWeightTable {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            config: WeightConfig::default(),
        }
    }
}

impl WeightLookup for StrategyWeightTable {
    fn weight(&self, strategy_id: &str, regime: Regime) -> f64 {
        self.rows
            .get(&(strategy_id.to_string(), regime))
            .map(|w| *w)
            .unwrap_or(self.config.default_weight)
    }
}
