use crate::market::VolatilityBucket;
use serde::{Deserialize, Serialize};

/// Discrete market state used to parameterise downstream thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regime {
    StrongUpMomentum,
    StrongDownMomentum,
    RangeBullish,
    RangeBearish,
    Choppy,
    VolatileBreakout,
    LowVolAccumulation,
}

impl Regime {
    pub const ALL: [Regime; 7] = [
        Regime::StrongUpMomentum,
        Regime::StrongDownMomentum,
        Regime::RangeBullish,
        Regime::RangeBearish,
        Regime::Choppy,
        Regime::VolatileBreakout,
        Regime::LowVolAccumulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::StrongUpMomentum => "strong_up_momentum",
            Regime::StrongDownMomentum => "strong_down_momentum",
            Regime::RangeBullish => "range_bullish",
            Regime::RangeBearish => "range_bearish",
            Regime::Choppy => "choppy",
            Regime::VolatileBreakout => "volatile_breakout",
            Regime::LowVolAccumulation => "low_vol_accumulation",
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the regime classifier for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub regime: Regime,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub volatility_bucket: VolatilityBucket,
    /// Standard deviation of log returns over the lookback
    pub volatility_score: f64,
    /// -1.0 (strong down) to 1.0 (strong up)
    pub trend_strength: f64,
    /// Bollinger band width relative to the mid band
    pub band_width: f64,
}

impl RegimeAssessment {
    /// Fallback used when history is missing or the fetch timed out
    pub fn neutral() -> Self {
        Self {
            regime: Regime::Choppy,
            confidence: 0.5,
            volatility_bucket: VolatilityBucket::Normal,
            volatility_score: 0.0,
            trend_strength: 0.0,
            band_width: 0.0,
        }
    }
}
