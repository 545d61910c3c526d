use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// True range against the previous close
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let hl = self.high - self.low;
        match prev_close {
            Some(pc) => hl.max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => hl,
        }
    }
}

/// Append-only rolling window of candles; the oldest bar falls off once full.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a candle. Bars older than the newest one are ignored.
    pub fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.back() {
            if candle.timestamp < last.timestamp {
                return false;
            }
        }
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
        true
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

/// Coarse volatility classification used by routing and regime mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolatilityBucket::Low => "low",
            VolatilityBucket::Normal => "normal",
            VolatilityBucket::High => "high",
            VolatilityBucket::Extreme => "extreme",
        };
        f.write_str(s)
    }
}
