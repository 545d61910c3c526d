// Simulated market
// Random-walk prices with a slowly switching drift so the regime changes over time

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{Candle, CandleWindow};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use signal_generation::MarketDataSource;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub start_price: f64,
    /// Standard deviation of a single tick's log return
    pub tick_volatility: f64,
    pub ticks_per_candle: usize,
    /// Largest per-tick drift in either direction
    pub max_drift: f64,
    /// Chance per tick that the drift is redrawn
    pub drift_change_probability: f64,
    /// Candles generated before the first request
    pub warmup_candles: usize,
    pub candle_minutes: i64,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_price: 100.0,
            tick_volatility: 0.0015,
            ticks_per_candle: 12,
            max_drift: 0.0008,
            drift_change_probability: 0.02,
            warmup_candles: 300,
            candle_minutes: 5,
            seed: None,
        }
    }
}

struct SymbolState {
    rng: fastrand::Rng,
    price: f64,
    drift: f64,
    window: CandleWindow,
    bar: Candle,
}

impl SymbolState {
    fn new(config: &SimulationConfig, rng: fastrand::Rng, opened_at: DateTime<Utc>) -> Self {
        let price = config.start_price.max(f64::EPSILON);
        Self {
            rng,
            price,
            drift: 0.0,
            window: CandleWindow::new(config.warmup_candles.max(1) * 2),
            bar: open_bar(opened_at, price),
        }
    }

    /// Standard normal draw (Box-Muller)
    fn gaussian(&mut self) -> f64 {
        let u1 = self.rng.f64().max(f64::MIN_POSITIVE);
        let u2 = self.rng.f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    fn tick(&mut self, config: &SimulationConfig) -> f64 {
        if self.rng.f64() < config.drift_change_probability {
            self.drift = (self.rng.f64() * 2.0 - 1.0) * config.max_drift;
        }
        let step = self.drift + config.tick_volatility * self.gaussian();
        self.price *= step.exp();

        self.bar.high = self.bar.high.max(self.price);
        self.bar.low = self.bar.low.min(self.price);
        self.bar.close = self.price;
        self.bar.volume += 1.0 + self.rng.f64() * 10.0 * (1.0 + step.abs() / config.tick_volatility.max(1e-12));
        self.price
    }

    fn close_bar(&mut self, config: &SimulationConfig) {
        for _ in 0..config.ticks_per_candle.max(1) {
            self.tick(config);
        }
        let next_open = self.bar.timestamp + Duration::minutes(config.candle_minutes.max(1));
        let finished = std::mem::replace(&mut self.bar, open_bar(next_open, self.price));
        self.window.push(finished);
    }
}

fn open_bar(timestamp: DateTime<Utc>, price: f64) -> Candle {
    Candle {
        timestamp,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 0.0,
    }
}

fn symbol_seed(seed: u64, symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(seed ^ 0xcbf2_9ce4_8422_2325, |acc, b| (acc ^ u64::from(b)).wrapping_mul(0x100_0000_01b3))
}

/// In-process market for running the engine without an exchange
pub struct SimulatedMarket {
    config: SimulationConfig,
    symbols: Mutex<HashMap<String, SymbolState>>,
}

impl SimulatedMarket {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    fn with_symbol<T>(&self, symbol: &str, f: impl FnOnce(&mut SymbolState, &SimulationConfig) -> T) -> anyhow::Result<T> {
        let mut symbols = self
            .symbols
            .lock()
            .map_err(|_| anyhow!("simulated market state poisoned"))?;
        let config = &self.config;
        let state = symbols.entry(symbol.to_string()).or_insert_with(|| {
            let rng = match config.seed {
                Some(seed) => fastrand::Rng::with_seed(symbol_seed(seed, symbol)),
                None => fastrand::Rng::new(),
            };
            let warmup = config.warmup_candles as i64;
            let opened_at = Utc::now() - Duration::minutes(config.candle_minutes.max(1) * warmup);
            let mut state = SymbolState::new(config, rng, opened_at);
            for _ in 0..config.warmup_candles {
                state.close_bar(config);
            }
            state
        });
        Ok(f(state, config))
    }
}

#[async_trait]
impl MarketDataSource for SimulatedMarket {
    async fn recent_candles(&self, symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>> {
        self.with_symbol(symbol, |state, config| {
            state.close_bar(config);
            let candles = state.window.to_vec();
            let start = candles.len().saturating_sub(count);
            candles[start..].to_vec()
        })
    }

    async fn current_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let price = self.with_symbol(symbol, |state, config| state.tick(config))?;
        Decimal::from_f64(price)
            .map(|p| p.round_dp(8))
            .ok_or_else(|| anyhow!("simulated price {} not representable", price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SimulatedMarket {
        SimulatedMarket::new(SimulationConfig {
            seed: Some(7),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_candles_are_ordered_and_consistent() {
        let market = seeded();
        let candles = market.recent_candles("BTCUSDT", 200).await.unwrap();

        assert_eq!(candles.len(), 200);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        for c in &candles {
            assert!(c.low <= c.open && c.low <= c.close);
            assert!(c.high >= c.open && c.high >= c.close);
            assert!(c.close > 0.0);
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_path() {
        let a = seeded().recent_candles("ETHUSDT", 50).await.unwrap();
        let b = seeded().recent_candles("ETHUSDT", 50).await.unwrap();
        let closes = |c: &[Candle]| c.iter().map(|c| c.close).collect::<Vec<_>>();
        assert_eq!(closes(&a), closes(&b));
    }

    #[tokio::test]
    async fn test_price_follows_last_candle() {
        let market = seeded();
        let candles = market.recent_candles("SOLUSDT", 10).await.unwrap();
        let last = candles.last().unwrap().close;
        let price = market.current_price("SOLUSDT").await.unwrap().to_f64().unwrap();
        assert!((price / last - 1.0).abs() < 0.05);
    }
}
