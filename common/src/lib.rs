//! Shared domain types for the signal consensus engine.
//!
//! Everything that crosses a crate boundary lives here: market observations,
//! strategy votes, consensus decisions, emitted signals and their outcomes.

pub mod decision;
pub mod error;
pub mod market;
pub mod outcome;
pub mod regime;
pub mod signal;

pub use decision::{
    ConsensusDecision, GateRejection, Priority, QualityTier, QualityVerdict, RoutedDecision,
    SignalDirection, StrategyRecommendation, TradeDirection,
};
pub use error::{PipelineError, PipelineResult};
pub use market::{Candle, CandleWindow, VolatilityBucket};
pub use outcome::{OutcomeClassification, OutcomeRecord};
pub use regime::{Regime, RegimeAssessment};
pub use signal::{EmittedSignal, SubscriberTier};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
