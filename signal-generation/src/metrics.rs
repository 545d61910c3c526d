//! Per-stage pipeline counters and the current regime per symbol

use common::{Regime, RegimeAssessment};
use dashmap::DashMap;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Regime,
    Consensus,
    Router,
    Queue,
    Gate,
    Distribution,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Regime,
        Stage::Consensus,
        Stage::Router,
        Stage::Queue,
        Stage::Gate,
        Stage::Distribution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Regime => "regime",
            Stage::Consensus => "consensus",
            Stage::Router => "router",
            Stage::Queue => "queue",
            Stage::Gate => "gate",
            Stage::Distribution => "distribution",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageResult {
    Evaluated,
    Routed,
    Accepted,
    Rejected,
    Failed,
}

impl StageResult {
    pub const ALL: [StageResult; 5] = [
        StageResult::Evaluated,
        StageResult::Routed,
        StageResult::Accepted,
        StageResult::Rejected,
        StageResult::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageResult::Evaluated => "evaluated",
            StageResult::Routed => "routed",
            StageResult::Accepted => "accepted",
            StageResult::Rejected => "rejected",
            StageResult::Failed => "failed",
        }
    }
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// "stage.result" -> count, zero entries omitted
    pub stage_counts: BTreeMap<String, u64>,
    pub regimes: BTreeMap<String, RegimeAssessment>,
}

impl PipelineSnapshot {
    pub fn count(&self, stage: Stage, result: StageResult) -> u64 {
        self.stage_counts
            .get(&format!("{}.{}", stage.as_str(), result.as_str()))
            .copied()
            .unwrap_or(0)
    }
}

pub struct PipelineMetrics {
    registry: Registry,
    stage_total: IntCounterVec,
    regime_current: IntGaugeVec,
    regimes: DashMap<String, RegimeAssessment>,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let stage_total = IntCounterVec::new(
            Opts::new("pipeline_stage_total", "Items seen by each pipeline stage, by result"),
            &["stage", "result"],
        )?;
        let regime_current = IntGaugeVec::new(
            Opts::new("pipeline_regime_current", "1 for the regime each symbol is currently in"),
            &["symbol", "regime"],
        )?;
        registry.register(Box::new(stage_total.clone()))?;
        registry.register(Box::new(regime_current.clone()))?;

        Ok(Self {
            registry,
            stage_total,
            regime_current,
            regimes: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record(&self, stage: Stage, result: StageResult) {
        self.stage_total
            .with_label_values(&[stage.as_str(), result.as_str()])
            .inc();
    }

    pub fn record_n(&self, stage: Stage, result: StageResult, count: u64) {
        if count > 0 {
            self.stage_total
                .with_label_values(&[stage.as_str(), result.as_str()])
                .inc_by(count);
        }
    }

    pub fn set_regime(&self, symbol: &str, assessment: RegimeAssessment) {
        for regime in Regime::ALL {
            let value = i64::from(regime == assessment.regime);
            self.regime_current
                .with_label_values(&[symbol, regime.as_str()])
                .set(value);
        }
        self.regimes.insert(symbol.to_string(), assessment);
    }

    pub fn regime(&self, symbol: &str) -> Option<RegimeAssessment> {
        self.regimes.get(symbol).map(|r| *r)
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let mut stage_counts = BTreeMap::new();
        for stage in Stage::ALL {
            for result in StageResult::ALL {
                let value = self
                    .stage_total
                    .with_label_values(&[stage.as_str(), result.as_str()])
                    .get();
                if value > 0 {
                    stage_counts.insert(format!("{}.{}", stage.as_str(), result.as_str()), value);
                }
            }
        }
        let regimes = self
            .regimes
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        PipelineSnapshot { stage_counts, regimes }
    }

    /// Prometheus text exposition of everything in the registry
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_regimes() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record(Stage::Consensus, StageResult::Evaluated);
        metrics.record(Stage::Consensus, StageResult::Evaluated);
        metrics.record(Stage::Router, StageResult::Rejected);
        metrics.record_n(Stage::Distribution, StageResult::Rejected, 3);
        metrics.record_n(Stage::Distribution, StageResult::Failed, 0);

        let mut assessment = RegimeAssessment::neutral();
        assessment.regime = Regime::VolatileBreakout;
        metrics.set_regime("BTCUSDT", assessment);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.count(Stage::Consensus, StageResult::Evaluated), 2);
        assert_eq!(snapshot.count(Stage::Router, StageResult::Rejected), 1);
        assert_eq!(snapshot.count(Stage::Gate, StageResult::Accepted), 0);
        assert_eq!(snapshot.count(Stage::Distribution, StageResult::Rejected), 3);
        assert!(!snapshot.stage_counts.contains_key("distribution.failed"));
        assert_eq!(snapshot.regimes["BTCUSDT"].regime, Regime::VolatileBreakout);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("pipeline_stage_total"));
        assert!(text.contains("regime=\"volatile_breakout\""));
    }
}
