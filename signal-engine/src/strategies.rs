// Built-in strategy detectors
// Small indicator rules that vote on each symbol; real deployments plug in
// their own `Strategy` implementations.

use async_trait::async_trait;
use common::{Candle, SignalDirection, StrategyRecommendation};
use signal_generation::indicators::{average_true_range, rsi, sma};
use signal_generation::{Strategy, StrategyContext, StrategyPanel};
use std::sync::Arc;
use std::time::Duration;

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Confidence between `base` and 95 growing with `strength` (0 to 1)
fn scaled_confidence(base: f64, strength: f64) -> f64 {
    (base + strength.clamp(0.0, 1.0) * (95.0 - base)).clamp(0.0, 100.0)
}

fn vote(id: &str, direction: SignalDirection, confidence: f64) -> Option<StrategyRecommendation> {
    Some(StrategyRecommendation::new(id, direction, confidence))
}

/// Rate of change over a short window
pub struct MomentumSurge {
    pub period: usize,
    pub min_change: f64,
}

impl Default for MomentumSurge {
    fn default() -> Self {
        Self {
            period: 10,
            min_change: 0.005,
        }
    }
}

#[async_trait]
impl Strategy for MomentumSurge {
    fn id(&self) -> &str {
        "momentum_surge"
    }

    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>> {
        let candles = context.candles.as_slice();
        if candles.len() <= self.period {
            return Ok(None);
        }
        let last = candles[candles.len() - 1].close;
        let base = candles[candles.len() - 1 - self.period].close;
        if base <= 0.0 {
            return Ok(None);
        }
        let change = last / base - 1.0;
        if change.abs() < self.min_change {
            return Ok(None);
        }
        let direction = if change > 0.0 { SignalDirection::Long } else { SignalDirection::Short };
        Ok(vote(self.id(), direction, scaled_confidence(55.0, change.abs() / (self.min_change * 4.0))))
    }
}

/// Fast average against slow average
pub struct TrendFollowing {
    pub fast: usize,
    pub slow: usize,
    pub min_spread: f64,
}

impl Default for TrendFollowing {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 50,
            min_spread: 0.002,
        }
    }
}

#[async_trait]
impl Strategy for TrendFollowing {
    fn id(&self) -> &str {
        "trend_following"
    }

    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>> {
        let closes = closes(&context.candles);
        let (Some(fast), Some(slow)) = (sma(&closes, self.fast), sma(&closes, self.slow)) else {
            return Ok(None);
        };
        if slow <= 0.0 {
            return Ok(None);
        }
        let spread = fast / slow - 1.0;
        if spread.abs() < self.min_spread {
            return Ok(None);
        }
        let direction = if spread > 0.0 { SignalDirection::Long } else { SignalDirection::Short };
        Ok(vote(self.id(), direction, scaled_confidence(55.0, spread.abs() / (self.min_spread * 5.0))))
    }
}

/// Close outside the recent high/low channel
pub struct Breakout {
    pub channel: usize,
    pub atr_period: usize,
}

impl Default for Breakout {
    fn default() -> Self {
        Self {
            channel: 20,
            atr_period: 14,
        }
    }
}

#[async_trait]
impl Strategy for Breakout {
    fn id(&self) -> &str {
        "breakout"
    }

    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>> {
        let candles = context.candles.as_slice();
        if candles.len() <= self.channel {
            return Ok(None);
        }
        let Some(atr) = average_true_range(candles, self.atr_period).filter(|a| *a > 0.0) else {
            return Ok(None);
        };
        let last = candles[candles.len() - 1];
        let channel = &candles[candles.len() - 1 - self.channel..candles.len() - 1];
        let high = channel.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = channel.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        if last.close > high {
            Ok(vote(self.id(), SignalDirection::Long, scaled_confidence(60.0, (last.close - high) / atr)))
        } else if last.close < low {
            Ok(vote(self.id(), SignalDirection::Short, scaled_confidence(60.0, (low - last.close) / atr)))
        } else {
            Ok(None)
        }
    }
}

/// Fades RSI extremes
pub struct MeanReversion {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for MeanReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

#[async_trait]
impl Strategy for MeanReversion {
    fn id(&self) -> &str {
        "mean_reversion"
    }

    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>> {
        let Some(value) = rsi(&closes(&context.candles), self.period) else {
            return Ok(None);
        };
        if value <= self.oversold {
            Ok(vote(self.id(), SignalDirection::Long, scaled_confidence(50.0, (self.oversold - value) / self.oversold)))
        } else if value >= self.overbought {
            let room = 100.0 - self.overbought;
            Ok(vote(self.id(), SignalDirection::Short, scaled_confidence(50.0, (value - self.overbought) / room)))
        } else {
            Ok(None)
        }
    }
}

/// Unusual volume in the direction of the last bar
pub struct VolumeSpike {
    pub period: usize,
    pub min_ratio: f64,
}

impl Default for VolumeSpike {
    fn default() -> Self {
        Self {
            period: 20,
            min_ratio: 2.0,
        }
    }
}

#[async_trait]
impl Strategy for VolumeSpike {
    fn id(&self) -> &str {
        "volume_spike"
    }

    async fn recommend(&self, context: &StrategyContext) -> anyhow::Result<Option<StrategyRecommendation>> {
        let candles = context.candles.as_slice();
        if candles.len() <= self.period {
            return Ok(None);
        }
        let last = candles[candles.len() - 1];
        let volumes: Vec<f64> = candles[candles.len() - 1 - self.period..candles.len() - 1]
            .iter()
            .map(|c| c.volume)
            .collect();
        let Some(average) = sma(&volumes, self.period).filter(|v| *v > 0.0) else {
            return Ok(None);
        };
        let ratio = last.volume / average;
        if ratio < self.min_ratio || last.close == last.open {
            return Ok(None);
        }
        let direction = if last.close > last.open { SignalDirection::Long } else { SignalDirection::Short };
        Ok(vote(self.id(), direction, scaled_confidence(50.0, (ratio - self.min_ratio) / self.min_ratio)))
    }
}

/// Panel with every built-in detector
pub fn default_panel(timeout: Duration) -> StrategyPanel {
    StrategyPanel::new(timeout)
        .add_strategy(Arc::new(MomentumSurge::default()))
        .add_strategy(Arc::new(TrendFollowing::default()))
        .add_strategy(Arc::new(Breakout::default()))
        .add_strategy(Arc::new(MeanReversion::default()))
        .add_strategy(Arc::new(VolumeSpike::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use common::RegimeAssessment;
    use signal_generation::StrategySource;

    fn context(closes: &[f64]) -> StrategyContext {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::minutes(i as i64),
                open: close,
                high: close * 1.001,
                low: close * 0.999,
                close,
                volume: 100.0,
            })
            .collect();
        StrategyContext {
            symbol: "BTCUSDT".to_string(),
            candles: Arc::new(candles),
            regime: RegimeAssessment::neutral(),
        }
    }

    #[tokio::test]
    async fn test_uptrend_votes_long() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.003f64.powi(i)).collect();
        let ctx = context(&closes);

        let momentum = MomentumSurge::default().recommend(&ctx).await.unwrap().unwrap();
        assert_eq!(momentum.direction, SignalDirection::Long);
        assert!(momentum.confidence >= 55.0 && momentum.confidence <= 95.0);

        let trend = TrendFollowing::default().recommend(&ctx).await.unwrap().unwrap();
        assert_eq!(trend.direction, SignalDirection::Long);

        let fade = MeanReversion::default().recommend(&ctx).await.unwrap().unwrap();
        assert_eq!(fade.direction, SignalDirection::Short);
    }

    #[tokio::test]
    async fn test_short_history_abstains() {
        let ctx = context(&[100.0, 101.0, 102.0]);
        let panel = default_panel(Duration::from_secs(1));
        assert!(panel.recommendations(&ctx).await.is_empty());
        assert_eq!(panel.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_flat_market_is_quiet() {
        let ctx = context(&vec![100.0; 120]);
        for strategy in [
            Arc::new(MomentumSurge::default()) as Arc<dyn Strategy>,
            Arc::new(TrendFollowing::default()),
            Arc::new(Breakout::default()),
            Arc::new(VolumeSpike::default()),
        ] {
            assert!(strategy.recommend(&ctx).await.unwrap().is_none(), "{}", strategy.id());
        }
    }

    #[test]
    fn test_profiles_cover_built_in_strategies() {
        use signal_generation::RegimeProfileTable;
        use std::collections::BTreeSet;

        let built_in: BTreeSet<String> = [
            Arc::new(MomentumSurge::default()) as Arc<dyn Strategy>,
            Arc::new(TrendFollowing::default()),
            Arc::new(Breakout::default()),
            Arc::new(MeanReversion::default()),
            Arc::new(VolumeSpike::default()),
        ]
        .iter()
        .map(|s| s.id().to_string())
        .collect();

        let table = RegimeProfileTable::default();
        let named: BTreeSet<String> = common::Regime::ALL
            .iter()
            .flat_map(|&r| {
                let profile = table.get(r);
                profile.recommended.iter().chain(&profile.excluded).cloned().collect::<Vec<_>>()
            })
            .collect();

        assert!(built_in.is_subset(&named));
        let external: Vec<&String> = named.difference(&built_in).collect();
        assert_eq!(external, ["order_flow", "range_bounce", "support_resistance"]);
    }
}
