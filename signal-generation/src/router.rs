// Priority routing
// Accepts or rejects a consensus decision and assigns its queue priority.
// Rejections are the expected majority and are returned, not raised.

use common::{ConsensusDecision, Priority, QualityTier, RoutedDecision, VolatilityBucket};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Regime confidence below which LOW-tier decisions are dropped
    pub min_regime_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_regime_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouterRejection {
    ExtremeVolatility { tier: QualityTier },
    UncertainRegime { regime_confidence: f64 },
    LowTierConditionsUnmet { volatility: VolatilityBucket },
}

impl std::fmt::Display for RouterRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterRejection::ExtremeVolatility { tier } => {
                write!(f, "{:?} tier in extreme volatility", tier)
            }
            RouterRejection::UncertainRegime { regime_confidence } => {
                write!(f, "low tier with regime confidence {:.2}", regime_confidence)
            }
            RouterRejection::LowTierConditionsUnmet { volatility } => {
                write!(f, "low tier needs low volatility, got {}", volatility)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    Routed(RoutedDecision),
    Rejected(RouterRejection),
}

impl RoutingOutcome {
    pub fn is_routed(&self) -> bool {
        matches!(self, RoutingOutcome::Routed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityRouter {
    config: RouterConfig,
}

impl PriorityRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// First matching rule wins
    pub fn route(
        &self,
        decision: ConsensusDecision,
        volatility: VolatilityBucket,
        regime_confidence: f64,
    ) -> RoutingOutcome {
        let tier = decision.quality_tier;
        let confident_regime = regime_confidence >= self.config.min_regime_confidence;

        let accepted = |priority: Priority, reason: &str| {
            RoutingOutcome::Routed(RoutedDecision {
                decision: decision.clone(),
                priority,
                routing_reason: reason.to_string(),
            })
        };

        let outcome = if tier == QualityTier::High {
            accepted(Priority::High, "high quality tier")
        } else if volatility == VolatilityBucket::Extreme {
            RoutingOutcome::Rejected(RouterRejection::ExtremeVolatility { tier })
        } else if !confident_regime && tier == QualityTier::Low {
            RoutingOutcome::Rejected(RouterRejection::UncertainRegime { regime_confidence })
        } else if tier == QualityTier::Medium {
            accepted(Priority::Medium, "medium quality tier")
        } else if volatility == VolatilityBucket::Low && confident_regime {
            accepted(Priority::Medium, "low tier in calm, well-classified market")
        } else {
            RoutingOutcome::Rejected(RouterRejection::LowTierConditionsUnmet { volatility })
        };

        match &outcome {
            RoutingOutcome::Routed(r) => debug!(
                symbol = %decision.symbol,
                priority = %r.priority,
                reason = %r.routing_reason,
                "Decision routed"
            ),
            RoutingOutcome::Rejected(reason) => debug!(
                symbol = %decision.symbol,
                reason = %reason,
                "Decision rejected by router"
            ),
        }

        outcome
    }
}
