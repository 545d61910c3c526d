// Market context attached to a routed decision
// Carries the price and ATR the quality gate and signal builder need, so
// neither has to block on a fetch.

use chrono::{DateTime, Utc};
use common::{PipelineError, PipelineResult, TradeDirection, VolatilityBucket};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Stop distance in ATRs
    pub stop_atr_multiple: f64,
    /// Target distances in ATRs, nearest first
    pub target_atr_multiples: Vec<f64>,
    /// Used as ATR (fraction of price) when candles were unavailable
    pub fallback_range_pct: f64,
    pub price_decimals: u32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            stop_atr_multiple: 1.5,
            target_atr_multiples: vec![2.0, 3.5, 5.0],
            fallback_range_pct: 0.01,
            price_decimals: 8,
        }
    }
}

impl LevelConfig {
    /// Outcome labels read targets as T1, T2, T3 in order, so multiples must rise strictly
    pub fn validate(&self) -> PipelineResult<()> {
        if self.stop_atr_multiple.is_nan() || self.stop_atr_multiple <= 0.0 {
            return Err(PipelineError::Config(format!(
                "stop_atr_multiple must be positive, got {}",
                self.stop_atr_multiple
            )));
        }
        if self.target_atr_multiples.is_empty() {
            return Err(PipelineError::Config("target_atr_multiples is empty".to_string()));
        }
        if self.target_atr_multiples.iter().any(|m| m.is_nan() || *m <= 0.0) {
            return Err(PipelineError::Config(format!(
                "target_atr_multiples must be positive: {:?}",
                self.target_atr_multiples
            )));
        }
        if self.target_atr_multiples.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Config(format!(
                "target_atr_multiples must be strictly ascending: {:?}",
                self.target_atr_multiples
            )));
        }
        Ok(())
    }
}

/// Entry, stop and targets for a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub targets: Vec<Decimal>,
}

impl TradeLevels {
    /// Reward to the first target over the risk to the stop
    pub fn risk_reward(&self) -> Option<f64> {
        let first = self.targets.first()?;
        let reward = (*first - self.entry).abs().to_f64()?;
        let risk = (self.entry - self.stop_loss).abs().to_f64()?;
        (risk > 0.0).then(|| reward / risk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    /// None when the price fetch failed or timed out
    pub price: Option<Decimal>,
    pub atr: Option<f64>,
    pub volatility: VolatilityBucket,
    pub fetched_at: DateTime<Utc>,
}

impl MarketContext {
    pub fn new(symbol: &str, price: Option<Decimal>, atr: Option<f64>, volatility: VolatilityBucket) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            atr,
            volatility,
            fetched_at: Utc::now(),
        }
    }

    /// Compute trade levels around the current price
    pub fn levels(&self, direction: TradeDirection, config: &LevelConfig) -> Option<TradeLevels> {
        let entry = self.price?;
        let entry_f = entry.to_f64()?;
        if entry_f <= 0.0 || config.target_atr_multiples.is_empty() {
            return None;
        }

        let atr = self
            .atr
            .filter(|a| a.is_finite() && *a > 0.0)
            .unwrap_or(entry_f * config.fallback_range_pct);
        let sign = direction.sign();
        let level = |multiple: f64| -> Option<Decimal> {
            let price = entry_f + sign * multiple * atr;
            if price <= 0.0 {
                return None;
            }
            Decimal::from_f64(price).map(|d| d.round_dp(config.price_decimals))
        };

        let stop_loss = level(-config.stop_atr_multiple)?;
        let targets = config
            .target_atr_multiples
            .iter()
            .map(|m| level(*m))
            .collect::<Option<Vec<_>>>()?;

        Some(TradeLevels {
            entry,
            stop_loss,
            targets,
        })
    }
}
