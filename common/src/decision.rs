use crate::regime::Regime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction a strategy votes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalDirection {
    Long,
    Short,
    Neutral,
}

impl SignalDirection {
    pub fn trade_direction(&self) -> Option<TradeDirection> {
        match self {
            SignalDirection::Long => Some(TradeDirection::Long),
            SignalDirection::Short => Some(TradeDirection::Short),
            SignalDirection::Neutral => None,
        }
    }
}

/// Direction of an actionable decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            TradeDirection::Long => 1.0,
            TradeDirection::Short => -1.0,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Long => f.write_str("long"),
            TradeDirection::Short => f.write_str("short"),
        }
    }
}

/// One pattern detector's vote for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub strategy_id: String,
    pub direction: SignalDirection,
    /// 0 to 100
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl StrategyRecommendation {
    pub fn new(strategy_id: impl Into<String>, direction: SignalDirection, confidence: f64) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            direction,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Medium => f.write_str("medium"),
            Priority::High => f.write_str("high"),
        }
    }
}

/// Aggregated directional decision produced by the consensus engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub id: Uuid,
    pub symbol: String,
    pub direction: TradeDirection,
    /// Weighted mean confidence of the agreeing voters, 0.0 to 1.0
    pub weighted_confidence: f64,
    /// Share of total vote weight on the long side
    pub long_share: f64,
    /// Fraction of voters matching the chosen direction, 0.0 to 1.0
    pub agreement_score: f64,
    /// Confidence after the regime quality adjustment, 0 to 100
    pub adjusted_confidence: f64,
    /// Agreement after the regime quality adjustment, 0 to 100
    pub adjusted_agreement: f64,
    /// Strategies that voted for the chosen direction
    pub voting_strategies: Vec<String>,
    pub total_voters: usize,
    /// Agreeing strategy with the largest effective weight
    pub primary_strategy: String,
    pub quality_tier: QualityTier,
    pub regime_at_decision: Regime,
    pub regime_confidence: f64,
    pub decided_at: DateTime<Utc>,
}

/// A decision accepted by the priority router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedDecision {
    pub decision: ConsensusDecision,
    pub priority: Priority,
    pub routing_reason: String,
}

/// Why the quality gate refused a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateRejection {
    MissingMarketContext,
    BelowFloor { score: f64, floor: f64 },
    WinProbabilityTooLow { estimated: f64, minimum: f64 },
    StrategyWinRateBelowFloor { strategy_id: String, win_rate: f64, floor: f64 },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::MissingMarketContext => write!(f, "no market context"),
            GateRejection::BelowFloor { score, floor } => {
                write!(f, "quality score {:.1} below floor {:.1}", score, floor)
            }
            GateRejection::WinProbabilityTooLow { estimated, minimum } => {
                write!(f, "win probability {:.2} below {:.2}", estimated, minimum)
            }
            GateRejection::StrategyWinRateBelowFloor { strategy_id, win_rate, floor } => {
                write!(
                    f,
                    "strategy {} trailing win rate {:.2} below {:.2}",
                    strategy_id, win_rate, floor
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub passed: bool,
    /// 0 to 100
    pub quality_score: f64,
    /// 0.0 to 1.0
    pub estimated_win_probability: f64,
    pub risk_reward: Option<f64>,
    pub rejection_reason: Option<GateRejection>,
}
