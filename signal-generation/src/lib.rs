// Signal Consensus Framework
// Turns candles and strategy votes into gated, prioritised trade signals

pub mod consensus;
pub mod context;
pub mod distribution;
pub mod history;
pub mod indicators;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod queue;
pub mod regime;
pub mod router;
pub mod sources;
pub mod weights;

pub use consensus::{ConsensusConfig, ConsensusEngine};
pub use context::{LevelConfig, MarketContext, TradeLevels};
pub use distribution::{DistributionConfig, DistributionScheduler, EmissionCheck, TierDelivery, TierStats};
pub use history::{OutcomeHistory, TrailingStats};
pub use metrics::{PipelineMetrics, PipelineSnapshot, Stage, StageResult};
pub use pipeline::{CycleOutcome, CycleReport, PipelineConfig, SignalPipeline};
pub use quality::{QualityGate, QualityGateConfig};
pub use queue::{EnqueueReceipt, QueueConfig, QueueConsumer, QueueStats, QueuedSignal, SignalQueue};
pub use regime::{RegimeClassifier, RegimeConfig, RegimeProfile, RegimeProfileTable, StrategyAffinity};
pub use router::{PriorityRouter, RouterConfig, RouterRejection, RoutingOutcome};
pub use sources::{MarketDataSource, Strategy, StrategyContext, StrategyPanel, StrategySource};
pub use weights::{StrategyWeight, StrategyWeightTable, WeightConfig, WeightLookup, WeightUpdate};
