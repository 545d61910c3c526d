// Outcome feedback into strategy weights and history

use common::{OutcomeClassification, OutcomeRecord};
use serde::{Deserialize, Serialize};
use signal_generation::{OutcomeHistory, StrategyWeightTable, WeightUpdate};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Training value at or above which a win strengthens the strategy
    pub strong_win_threshold: f64,
    pub win_factor: f64,
    pub loss_factor: f64,
    pub wrong_direction_factor: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            strong_win_threshold: 0.8,
            win_factor: 1.05,
            loss_factor: 0.95,
            wrong_direction_factor: 0.98,
        }
    }
}

impl FeedbackConfig {
    /// Multiplier for a resolved outcome, `None` when the weight is left alone
    pub fn factor(&self, record: &OutcomeRecord) -> Option<f64> {
        let value = record.training_value?;
        match record.classification {
            OutcomeClassification::Loss => Some(self.loss_factor),
            OutcomeClassification::TimeoutWrongDirection => Some(self.wrong_direction_factor),
            _ if value >= self.strong_win_threshold => Some(self.win_factor),
            _ => None,
        }
    }
}

/// Nudges the originating strategy's weight in the regime the signal was born in
pub struct FeedbackLoop {
    config: FeedbackConfig,
    weights: Arc<StrategyWeightTable>,
    history: Arc<OutcomeHistory>,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackConfig, weights: Arc<StrategyWeightTable>, history: Arc<OutcomeHistory>) -> Self {
        Self {
            config,
            weights,
            history,
        }
    }

    pub fn apply(&self, record: &OutcomeRecord) -> Option<WeightUpdate> {
        self.history.record(&record.strategy_id, record.classification);

        let factor = self.config.factor(record)?;
        match self.weights.apply_factor(&record.strategy_id, record.regime, factor) {
            Ok(update) => {
                info!(
                    strategy = %record.strategy_id,
                    regime = %record.regime,
                    outcome = record.classification.as_str(),
                    before = update.before,
                    after = update.after,
                    "Strategy weight adjusted"
                );
                Some(update)
            }
            Err(e) => {
                error!(strategy = %record.strategy_id, error = %e, "Weight feedback failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Regime, Uuid};
    use signal_generation::{WeightConfig, WeightLookup};

    fn record(strategy: &str, classification: OutcomeClassification) -> OutcomeRecord {
        OutcomeRecord {
            signal_id: Uuid::new_v4(),
            symbol: "ETHUSDT".to_string(),
            strategy_id: strategy.to_string(),
            regime: Regime::RangeBullish,
            classification,
            realized_return_pct: 0.0,
            training_value: classification.training_value(),
            resolved_at: Utc::now(),
        }
    }

    fn feedback() -> (FeedbackLoop, Arc<StrategyWeightTable>, Arc<OutcomeHistory>) {
        let weights = Arc::new(StrategyWeightTable::default());
        let history = Arc::new(OutcomeHistory::default());
        (
            FeedbackLoop::new(FeedbackConfig::default(), weights.clone(), history.clone()),
            weights,
            history,
        )
    }

    #[test]
    fn test_factors_by_outcome() {
        let (fb, weights, _) = feedback();

        let update = fb.apply(&record("range_bounce", OutcomeClassification::WinT2)).unwrap();
        assert!((update.after - 1.05).abs() < 1e-12);

        let update = fb.apply(&record("support_resistance", OutcomeClassification::Loss)).unwrap();
        assert!((update.after - 0.95).abs() < 1e-12);

        let update = fb
            .apply(&record("mean_reversion", OutcomeClassification::TimeoutWrongDirection))
            .unwrap();
        assert!((update.after - 0.98).abs() < 1e-12);

        assert!(fb.apply(&record("breakout", OutcomeClassification::TimeoutValidSlow)).is_none());
        assert_eq!(weights.weight("breakout", Regime::RangeBullish), 1.0);
    }

    #[test]
    fn test_invalidated_gives_no_feedback() {
        let (fb, weights, history) = feedback();
        assert!(fb.apply(&record("range_bounce", OutcomeClassification::Invalidated)).is_none());
        assert!(weights.is_empty());
        assert!(history.trailing("range_bounce").is_none());
    }

    #[test]
    fn test_repeated_feedback_stays_in_clamp() {
        let (fb, weights, _) = feedback();
        for _ in 0..200 {
            fb.apply(&record("winner", OutcomeClassification::WinT3));
            fb.apply(&record("loser", OutcomeClassification::Loss));
        }
        let config = WeightConfig::default();
        assert_eq!(weights.weight("winner", Regime::RangeBullish), config.max_weight);
        assert_eq!(weights.weight("loser", Regime::RangeBullish), config.min_weight);
    }

    #[test]
    fn test_history_records_outcomes() {
        let (fb, _, history) = feedback();
        fb.apply(&record("range_bounce", OutcomeClassification::WinT1));
        fb.apply(&record("range_bounce", OutcomeClassification::TimeoutStagnation));

        let stats = history.trailing("range_bounce").unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.wins, 1);
    }
}
