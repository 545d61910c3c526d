use crate::decision::{Priority, TradeDirection};
use crate::regime::Regime;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A gate-passed trading opportunity handed to the distribution boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedSignal {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    /// Ascending distance from entry: T1, T2, T3
    pub targets: Vec<Decimal>,
    /// 0 to 100
    pub confidence: f64,
    pub quality_score: f64,
    pub priority: Priority,
    pub regime: Regime,
    pub strategy_id: String,
    pub contributing_strategies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EmittedSignal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Subscriber tier served by the distribution scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriberTier {
    Free,
    Pro,
    Max,
}

impl SubscriberTier {
    pub const ALL: [SubscriberTier; 3] = [SubscriberTier::Free, SubscriberTier::Pro, SubscriberTier::Max];
}

impl std::fmt::Display for SubscriberTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberTier::Free => f.write_str("free"),
            SubscriberTier::Pro => f.write_str("pro"),
            SubscriberTier::Max => f.write_str("max"),
        }
    }
}
