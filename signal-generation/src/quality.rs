//! Quality gate: final statistical pass/fail before a decision becomes a signal
//!
//! The gate reads trailing outcome history but never writes shared state, so
//! repeated evaluation of the same inputs yields the same verdict.

use crate::context::{LevelConfig, MarketContext};
use crate::history::OutcomeHistory;
use common::{GateRejection, QualityVerdict, RoutedDecision};
use serde::{Deserialize, Serialize};
use statrs::distribution::Beta;
use statrs::statistics::Distribution;
use std::sync::Arc;
use tracing::debug;

const CONFIDENCE_WEIGHT: f64 = 0.40;
const AGREEMENT_WEIGHT: f64 = 0.25;
const WIN_PROBABILITY_WEIGHT: f64 = 0.25;
const RISK_REWARD_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    /// Minimum quality score (0-100)
    pub floor: f64,
    pub min_win_probability: f64,
    /// Trailing win-rate floor for the primary strategy
    pub min_strategy_win_rate: f64,
    /// Outcomes needed before the win-rate floor applies
    pub min_history_samples: usize,
    /// Pseudo-observations behind the confidence-derived prior
    pub prior_strength: f64,
    /// Risk/reward at which the risk-reward component saturates
    pub max_risk_reward: f64,
    pub levels: LevelConfig,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            floor: 50.0,
            min_win_probability: 0.45,
            min_strategy_win_rate: 0.35,
            min_history_samples: 10,
            prior_strength: 20.0,
            max_risk_reward: 2.0,
            levels: LevelConfig::default(),
        }
    }
}

pub struct QualityGate {
    config: QualityGateConfig,
    history: Arc<OutcomeHistory>,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig, history: Arc<OutcomeHistory>) -> Self {
        Self { config, history }
    }

    pub fn config(&self) -> &QualityGateConfig {
        &self.config
    }

    /// Score a routed decision. Priority never affects the outcome.
    pub fn evaluate(&self, routed: &RoutedDecision, context: &MarketContext) -> QualityVerdict {
        let decision = &routed.decision;
        let trailing = self.history.trailing(&decision.primary_strategy);
        let win_probability = self.win_probability(
            decision.adjusted_confidence,
            trailing.map(|t| (t.wins, t.total - t.wins)),
        );

        let risk_reward = context
            .levels(decision.direction, &self.config.levels)
            .and_then(|levels| levels.risk_reward());

        let Some(rr) = risk_reward else {
            debug!(
                decision_id = %decision.id,
                symbol = %decision.symbol,
                "Gate rejected: no market context"
            );
            return QualityVerdict {
                passed: false,
                quality_score: 0.0,
                estimated_win_probability: win_probability,
                risk_reward: None,
                rejection_reason: Some(GateRejection::MissingMarketContext),
            };
        };

        let rr_score = if self.config.max_risk_reward > 0.0 {
            (rr / self.config.max_risk_reward).clamp(0.0, 1.0) * 100.0
        } else {
            0.0
        };

        let quality_score = (decision.adjusted_confidence * CONFIDENCE_WEIGHT
            + decision.adjusted_agreement * AGREEMENT_WEIGHT
            + win_probability * 100.0 * WIN_PROBABILITY_WEIGHT
            + rr_score * RISK_REWARD_WEIGHT)
            .clamp(0.0, 100.0);

        let rejection = if quality_score < self.config.floor {
            Some(GateRejection::BelowFloor {
                score: quality_score,
                floor: self.config.floor,
            })
        } else if win_probability < self.config.min_win_probability {
            Some(GateRejection::WinProbabilityTooLow {
                estimated: win_probability,
                minimum: self.config.min_win_probability,
            })
        } else {
            trailing
                .filter(|t| t.total >= self.config.min_history_samples)
                .filter(|t| t.win_rate < self.config.min_strategy_win_rate)
                .map(|t| GateRejection::StrategyWinRateBelowFloor {
                    strategy_id: decision.primary_strategy.clone(),
                    win_rate: t.win_rate,
                    floor: self.config.min_strategy_win_rate,
                })
        };

        match &rejection {
            Some(reason) => debug!(
                decision_id = %decision.id,
                symbol = %decision.symbol,
                quality_score,
                reason = %reason,
                "Gate rejected"
            ),
            None => debug!(
                decision_id = %decision.id,
                symbol = %decision.symbol,
                quality_score,
                win_probability,
                "Gate passed"
            ),
        }

        QualityVerdict {
            passed: rejection.is_none(),
            quality_score,
            estimated_win_probability: win_probability,
            risk_reward: Some(rr),
            rejection_reason: rejection,
        }
    }

    /// Posterior mean of a Beta prior centred on the adjusted confidence,
    /// updated with the strategy's trailing (wins, non-wins).
    fn win_probability(&self, adjusted_confidence: f64, record: Option<(usize, usize)>) -> f64 {
        let prior_mean = (adjusted_confidence / 100.0).clamp(0.01, 0.99);
        let strength = self.config.prior_strength.max(1.0);
        let (wins, losses) = record.unwrap_or((0, 0));
        let alpha = prior_mean * strength + wins as f64;
        let beta = (1.0 - prior_mean) * strength + losses as f64;

        Beta::new(alpha, beta)
            .ok()
            .and_then(|dist| dist.mean())
            .unwrap_or(alpha / (alpha + beta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::routed;
    use common::{OutcomeClassification, Priority, VolatilityBucket};
    use rust_decimal_macros::dec;

    fn context() -> MarketContext {
        MarketContext::new("BTCUSDT", Some(dec!(100)), Some(2.0), VolatilityBucket::Normal)
    }

    fn gate_with(history: Arc<OutcomeHistory>) -> QualityGate {
        QualityGate::new(QualityGateConfig::default(), history)
    }

    fn with_scores(priority: Priority, confidence: f64, agreement: f64) -> RoutedDecision {
        let mut r = routed(priority);
        r.decision.adjusted_confidence = confidence;
        r.decision.adjusted_agreement = agreement;
        r
    }

    #[test]
    fn test_strong_decision_passes() {
        // Five agreeing voters in strong up momentum
        let gate = gate_with(Arc::new(OutcomeHistory::default()));
        let verdict = gate.evaluate(&with_scores(Priority::High, 81.15, 100.0), &context());

        assert!(verdict.passed, "{:?}", verdict.rejection_reason);
        assert!((verdict.estimated_win_probability - 0.8115).abs() < 1e-9);
        let rr = verdict.risk_reward.unwrap();
        assert!((rr - 4.0 / 3.0).abs() < 1e-9);
        let expected = 81.15 * 0.4 + 100.0 * 0.25 + 81.15 * 0.25 + (rr / 2.0) * 100.0 * 0.1;
        assert!((verdict.quality_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let history = Arc::new(OutcomeHistory::default());
        for _ in 0..5 {
            history.record("s1", OutcomeClassification::WinT1);
        }
        history.record("s1", OutcomeClassification::Loss);
        let gate = gate_with(history);
        let routed = with_scores(Priority::Medium, 62.0, 70.0);
        let ctx = context();

        let first = gate.evaluate(&routed, &ctx);
        for _ in 0..10 {
            assert_eq!(gate.evaluate(&routed, &ctx), first);
        }
    }

    #[test]
    fn test_never_passes_below_floor() {
        let gate = gate_with(Arc::new(OutcomeHistory::default()));
        let ctx = context();
        for priority in [Priority::High, Priority::Medium] {
            for c in (0..=100).step_by(5) {
                for a in (0..=100).step_by(10) {
                    let verdict = gate.evaluate(&with_scores(priority, c as f64, a as f64), &ctx);
                    if verdict.quality_score < 50.0 {
                        assert!(!verdict.passed);
                    }
                    if verdict.passed {
                        assert!(verdict.quality_score >= 50.0);
                        assert!(verdict.estimated_win_probability >= 0.45);
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_win_probability_rejected() {
        // Full agreement carries the score above the floor, the prior does not
        let gate = gate_with(Arc::new(OutcomeHistory::default()));
        let verdict = gate.evaluate(&with_scores(Priority::Medium, 40.0, 100.0), &context());

        assert!(!verdict.passed);
        assert!(verdict.quality_score >= 50.0);
        assert!(matches!(
            verdict.rejection_reason,
            Some(GateRejection::WinProbabilityTooLow { .. })
        ));
    }

    #[test]
    fn test_strategy_win_rate_floor() {
        let history = Arc::new(OutcomeHistory::default());
        for i in 0..20 {
            let class = if i < 5 { OutcomeClassification::WinT2 } else { OutcomeClassification::Loss };
            history.record("s1", class);
        }
        // Enough samples at a 25% win rate; a heavy prior keeps the posterior high
        let gate = QualityGate::new(
            QualityGateConfig {
                prior_strength: 200.0,
                ..Default::default()
            },
            history,
        );
        let verdict = gate.evaluate(&with_scores(Priority::High, 90.0, 100.0), &context());

        assert!(!verdict.passed);
        assert!(matches!(
            verdict.rejection_reason,
            Some(GateRejection::StrategyWinRateBelowFloor { ref strategy_id, .. }) if strategy_id == "s1"
        ));
    }

    #[test]
    fn test_short_history_does_not_trigger_floor() {
        let history = Arc::new(OutcomeHistory::default());
        for _ in 0..3 {
            history.record("s1", OutcomeClassification::Loss);
        }
        let gate = gate_with(history);
        let verdict = gate.evaluate(&with_scores(Priority::High, 90.0, 100.0), &context());
        assert!(verdict.passed, "{:?}", verdict.rejection_reason);
    }

    #[test]
    fn test_missing_price_rejected() {
        let gate = gate_with(Arc::new(OutcomeHistory::default()));
        let ctx = MarketContext::new("BTCUSDT", None, Some(2.0), VolatilityBucket::Normal);
        let verdict = gate.evaluate(&with_scores(Priority::High, 95.0, 100.0), &ctx);

        assert!(!verdict.passed);
        assert_eq!(verdict.rejection_reason, Some(GateRejection::MissingMarketContext));
    }
}
