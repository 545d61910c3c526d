//! Engine configuration

use crate::simulated::SimulationConfig;
use anyhow::{bail, Context};
use monitoring::{FeedbackConfig, OutcomeConfig};
use serde::{Deserialize, Serialize};
use signal_generation::{DistributionConfig, PipelineConfig};

/// Prefix for environment overrides, e.g. `SIGNAL_ENGINE__CYCLE_INTERVAL_SECS=30`
pub const ENV_PREFIX: &str = "SIGNAL_ENGINE";

pub const DEFAULT_CONFIG_PATH: &str = "signal-engine.toml";

/// Overall engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbols evaluated every cycle
    pub symbols: Vec<String>,

    /// Seconds between pipeline cycles
    pub cycle_interval_secs: u64,

    /// Deadline for each strategy's vote (ms)
    pub strategy_timeout_ms: u64,

    pub pipeline: PipelineConfig,
    pub distribution: DistributionConfig,
    pub outcome: OutcomeConfig,
    pub feedback: FeedbackConfig,
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()],
            cycle_interval_secs: 60,
            strategy_timeout_ms: 1_500,
            pipeline: PipelineConfig::default(),
            distribution: DistributionConfig::default(),
            outcome: OutcomeConfig::default(),
            feedback: FeedbackConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if self.cycle_interval_secs == 0 {
            bail!("cycle_interval_secs must be positive");
        }
        if self.strategy_timeout_ms == 0 {
            bail!("strategy_timeout_ms must be positive");
        }
        self.pipeline.validate().context("invalid pipeline configuration")?;
        Ok(())
    }
}

/// Load configuration from a TOML file (optional) plus environment overrides
pub fn load_config(path: &str) -> anyhow::Result<EngineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {}", path))?;

    let config: EngineConfig = settings
        .try_deserialize()
        .context("Failed to parse engine configuration")?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &EngineConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

pub const CONFIG_TEMPLATE: &str = "# Signal Consensus Engine Configuration
# Any value can be overridden with SIGNAL_ENGINE__<SECTION>__<KEY>

# Symbols evaluated every cycle
symbols = [\"BTCUSDT\", \"ETHUSDT\", \"SOLUSDT\"]

# Seconds between pipeline cycles
cycle_interval_secs = 60

# Deadline for each strategy's vote (ms)
strategy_timeout_ms = 1500

[pipeline]
# Candles fetched per cycle and how many the regime classifier uses
candle_count = 200
lookback = 100
atr_period = 14

# Bound on every market data fetch (ms)
fetch_timeout_ms = 2000

# Signal lifetime, also the outcome time barrier (minutes)
signal_ttl_minutes = 240

# Outcomes kept per strategy for trailing win-rates
history_window = 50

[pipeline.router]
# Regime confidence needed for LOW tier decisions
min_regime_confidence = 0.6

[pipeline.queue]
high_capacity = 64
medium_capacity = 256

[pipeline.gate]
# Minimum quality score (0-100)
floor = 50.0

# Minimum estimated win probability
min_win_probability = 0.45

# Trailing win-rate floor for the primary strategy
min_strategy_win_rate = 0.35
min_history_samples = 10

[pipeline.weights]
default_weight = 1.0
min_weight = 0.25
max_weight = 3.0

[distribution]
# Seconds between emissions per subscriber tier
free_interval_secs = 3600
pro_interval_secs = 900
max_interval_secs = 300
buffer_capacity = 32

[outcome]
# Price polling for open signals (ms)
poll_interval_ms = 5000
price_timeout_ms = 2000

[feedback]
# Weight multipliers applied to the originating strategy
win_factor = 1.05
loss_factor = 0.95
wrong_direction_factor = 0.98

[simulation]
start_price = 100.0
tick_volatility = 0.0015
";

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("signal-engine-{}-{}.toml", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.gate.floor, 50.0);
        assert_eq!(config.symbols.len(), 3);
    }

    #[test]
    fn test_template_matches_defaults() {
        let parsed: EngineConfig = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = EngineConfig::default();

        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.symbols, defaults.symbols);
        assert_eq!(parsed.pipeline.candle_count, defaults.pipeline.candle_count);
        assert_eq!(parsed.pipeline.queue.medium_capacity, defaults.pipeline.queue.medium_capacity);
        assert_eq!(parsed.pipeline.gate.min_win_probability, defaults.pipeline.gate.min_win_probability);
        assert_eq!(parsed.distribution.pro_interval_secs, defaults.distribution.pro_interval_secs);
        assert_eq!(parsed.feedback.loss_factor, defaults.feedback.loss_factor);
        assert_eq!(parsed.pipeline.profiles, defaults.pipeline.profiles);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut config = EngineConfig::default();
        config.symbols = vec!["ADAUSDT".to_string()];
        config.pipeline.gate.floor = 60.0;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.symbols, vec!["ADAUSDT".to_string()]);
        assert_eq!(loaded.pipeline.gate.floor, 60.0);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let path = temp_path("invalid");
        std::fs::write(
            &path,
            "[pipeline.profiles.choppy]\nconsensus_threshold = 0.9\nquality_adjustment = 0.0\nrecommended = []\nexcluded = []\n",
        )
        .unwrap();

        let result = load_config(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
