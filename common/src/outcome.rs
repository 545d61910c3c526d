use crate::regime::Regime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Triple-barrier label for a resolved signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeClassification {
    WinT1,
    WinT2,
    WinT3,
    Loss,
    TimeoutStagnation,
    TimeoutWrongDirection,
    TimeoutLowVolatility,
    TimeoutValidSlow,
    /// Tracking cancelled externally before any barrier was reached
    Invalidated,
}

impl OutcomeClassification {
    /// Label used to train strategy weights. `None` means no feedback.
    pub fn training_value(&self) -> Option<f64> {
        match self {
            OutcomeClassification::WinT3 => Some(1.0),
            OutcomeClassification::WinT2 => Some(0.9),
            OutcomeClassification::WinT1 => Some(0.8),
            OutcomeClassification::TimeoutValidSlow => Some(0.5),
            OutcomeClassification::TimeoutLowVolatility => Some(0.4),
            OutcomeClassification::TimeoutStagnation => Some(0.2),
            OutcomeClassification::TimeoutWrongDirection => Some(0.1),
            OutcomeClassification::Loss => Some(0.0),
            OutcomeClassification::Invalidated => None,
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(
            self,
            OutcomeClassification::WinT1 | OutcomeClassification::WinT2 | OutcomeClassification::WinT3
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            OutcomeClassification::TimeoutStagnation
                | OutcomeClassification::TimeoutWrongDirection
                | OutcomeClassification::TimeoutLowVolatility
                | OutcomeClassification::TimeoutValidSlow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClassification::WinT1 => "win_t1",
            OutcomeClassification::WinT2 => "win_t2",
            OutcomeClassification::WinT3 => "win_t3",
            OutcomeClassification::Loss => "loss",
            OutcomeClassification::TimeoutStagnation => "timeout_stagnation",
            OutcomeClassification::TimeoutWrongDirection => "timeout_wrong_direction",
            OutcomeClassification::TimeoutLowVolatility => "timeout_low_volatility",
            OutcomeClassification::TimeoutValidSlow => "timeout_valid_slow",
            OutcomeClassification::Invalidated => "invalidated",
        }
    }
}

/// Final result for one emitted signal. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub signal_id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    pub regime: Regime,
    pub classification: OutcomeClassification,
    pub realized_return_pct: f64,
    pub training_value: Option<f64>,
    pub resolved_at: DateTime<Utc>,
}
