//! Regime-adaptive ensemble voting
//!
//! Aggregates independent strategy recommendations into at most one
//! directional decision. No-consensus is the normal outcome and is reported
//! as `None`, never as an error.

use crate::regime::{RegimeProfileTable, StrategyAffinity};
use crate::weights::WeightLookup;
use chrono::Utc;
use common::{
    ConsensusDecision, QualityTier, RegimeAssessment, StrategyRecommendation, TradeDirection,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub recommended_multiplier: f64,
    pub excluded_multiplier: f64,
    pub unclassified_multiplier: f64,
    /// Fewer directional voters than this yields no decision at all
    pub min_voters: usize,
    pub high_min_confidence: f64,
    pub high_min_agreement: f64,
    pub high_min_votes: usize,
    pub medium_min_confidence: f64,
    pub medium_min_agreement: f64,
    pub medium_min_votes: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            recommended_multiplier: 1.5,
            excluded_multiplier: 0.5,
            unclassified_multiplier: 1.0,
            min_voters: 1,
            high_min_confidence: 70.0,
            high_min_agreement: 75.0,
            high_min_votes: 4,
            medium_min_confidence: 55.0,
            medium_min_agreement: 55.0,
            medium_min_votes: 2,
        }
    }
}

/// A recommendation that takes part in the vote
struct Voter<'a> {
    strategy_id: &'a str,
    direction: TradeDirection,
    /// 0.0 to 1.0
    confidence: f64,
    /// base weight x regime multiplier
    vote_weight: f64,
}

impl Voter<'_> {
    fn effective_weight(&self) -> f64 {
        self.vote_weight * self.confidence
    }
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    profiles: Arc<RegimeProfileTable>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, profiles: Arc<RegimeProfileTable>) -> Self {
        Self { config, profiles }
    }

    pub fn profiles(&self) -> &RegimeProfileTable {
        &self.profiles
    }

    fn regime_multiplier(&self, affinity: StrategyAffinity) -> f64 {
        match affinity {
            StrategyAffinity::Recommended => self.config.recommended_multiplier,
            StrategyAffinity::Excluded => self.config.excluded_multiplier,
            StrategyAffinity::Unclassified => self.config.unclassified_multiplier,
        }
    }

    /// Compute the weighted consensus for one symbol.
    ///
    /// Returns `None` when nobody votes, when total vote weight is zero, or
    /// when neither side strictly exceeds the regime's threshold.
    pub fn compute_consensus(
        &self,
        symbol: &str,
        recommendations: &[StrategyRecommendation],
        regime: &RegimeAssessment,
        weights: &dyn WeightLookup,
    ) -> Option<ConsensusDecision> {
        let profile = self.profiles.get(regime.regime);

        // One vote per strategy: the latest recommendation wins
        let mut latest: HashMap<&str, &StrategyRecommendation> = HashMap::new();
        for rec in recommendations {
            match latest.get(rec.strategy_id.as_str()) {
                Some(existing) if existing.timestamp >= rec.timestamp => {}
                _ => {
                    latest.insert(rec.strategy_id.as_str(), rec);
                }
            }
        }

        let mut voters: Vec<Voter> = latest
            .into_values()
            .filter_map(|rec| {
                let direction = rec.direction.trade_direction()?;
                if !rec.confidence.is_finite() {
                    return None;
                }
                let base = weights.weight(&rec.strategy_id, regime.regime);
                let base = if base.is_finite() { base.max(0.0) } else { 0.0 };
                Some(Voter {
                    strategy_id: rec.strategy_id.as_str(),
                    direction,
                    confidence: rec.confidence.clamp(0.0, 100.0) / 100.0,
                    vote_weight: base * self.regime_multiplier(profile.affinity(&rec.strategy_id)),
                })
            })
            .collect();
        voters.sort_by(|a, b| a.strategy_id.cmp(b.strategy_id));

        if voters.is_empty() || voters.len() < self.config.min_voters {
            debug!(symbol, voters = voters.len(), "Not enough voters for consensus");
            return None;
        }

        let (long_weight, short_weight) =
            voters.iter().fold((0.0, 0.0), |(long, short), v| match v.direction {
                TradeDirection::Long => (long + v.effective_weight(), short),
                TradeDirection::Short => (long, short + v.effective_weight()),
            });
        let total = long_weight + short_weight;
        if !(total > 0.0) {
            debug!(symbol, "Total vote weight is zero");
            return None;
        }

        let long_share = long_weight / total;
        let threshold = profile.consensus_threshold;
        let direction = if long_share > threshold {
            TradeDirection::Long
        } else if (1.0 - long_share) > threshold {
            TradeDirection::Short
        } else {
            debug!(symbol, long_share, threshold, regime = %regime.regime, "No consensus");
            return None;
        };

        let agreeing: Vec<&Voter> = voters.iter().filter(|v| v.direction == direction).collect();
        let agreement_score = agreeing.len() as f64 / voters.len() as f64;

        let agreeing_weight: f64 = agreeing.iter().map(|v| v.vote_weight).sum();
        let weighted_confidence = if agreeing_weight > 0.0 {
            agreeing.iter().map(|v| v.vote_weight * v.confidence).sum::<f64>() / agreeing_weight
        } else {
            0.0
        }
        .clamp(0.0, 1.0);

        let adjustment = profile.quality_adjustment;
        let adjusted_confidence = (weighted_confidence * 100.0 + adjustment).clamp(0.0, 100.0);
        let adjusted_agreement = (agreement_score * 100.0 + adjustment).clamp(0.0, 100.0);
        let quality_tier = self.tier(adjusted_confidence, adjusted_agreement, agreeing.len());

        let primary_strategy = agreeing
            .iter()
            .fold(None::<&&Voter>, |best, v| match best {
                Some(b) if b.effective_weight() >= v.effective_weight() => Some(b),
                _ => Some(v),
            })
            .map(|v| v.strategy_id.to_string())
            .unwrap_or_default();

        let decision = ConsensusDecision {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction,
            weighted_confidence,
            long_share,
            agreement_score,
            adjusted_confidence,
            adjusted_agreement,
            voting_strategies: agreeing.iter().map(|v| v.strategy_id.to_string()).collect(),
            total_voters: voters.len(),
            primary_strategy,
            quality_tier,
            regime_at_decision: regime.regime,
            regime_confidence: regime.confidence,
            decided_at: Utc::now(),
        };

        debug!(
            symbol,
            direction = %decision.direction,
            long_share,
            confidence = adjusted_confidence,
            agreement = adjusted_agreement,
            tier = ?quality_tier,
            "Consensus reached"
        );

        Some(decision)
    }

    fn tier(&self, confidence: f64, agreement: f64, votes: usize) -> QualityTier {
        let c = &self.config;
        if confidence >= c.high_min_confidence
            && agreement >= c.high_min_agreement
            && votes >= c.high_min_votes
        {
            QualityTier::High
        } else if confidence >= c.medium_min_confidence
            && agreement >= c.medium_min_agreement
            && votes >= c.medium_min_votes
        {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }
}
