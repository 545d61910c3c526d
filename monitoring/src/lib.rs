pub mod feedback;
pub mod ledger;
pub mod metrics;
pub mod outcome;
pub mod tracker;

pub use feedback::{FeedbackConfig, FeedbackLoop};
pub use ledger::OutcomeLedger;
pub use metrics::{EngineSnapshot, MetricsSurface, PerformanceCalculator, StrategyComparison, StrategyPerformance};
pub use outcome::{OutcomeClassifier, OutcomeConfig, TripleBarrier};
pub use tracker::{LoggingSink, OutcomeSink, OutcomeTracker};

// Re-export from common
pub use common::{OutcomeClassification, OutcomeRecord};
