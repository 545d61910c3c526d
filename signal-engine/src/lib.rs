// Signal Consensus Engine
// Wires the consensus pipeline, distribution and outcome feedback into one service

pub mod config;
pub mod engine;
pub mod simulated;
pub mod strategies;

pub use config::{create_config_template, load_config, save_config, EngineConfig, DEFAULT_CONFIG_PATH};
pub use engine::{EngineParts, LoggingDelivery, SignalEngine};
pub use simulated::{SimulatedMarket, SimulationConfig};
pub use strategies::default_panel;
