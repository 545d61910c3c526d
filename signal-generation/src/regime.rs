//! Market regime classification
//!
//! Turns a rolling candle window into one of seven discrete regimes. The
//! mapping is a pure threshold table over trend strength, volatility bucket
//! and band width, so the same window always yields the same assessment.

use crate::indicators::{self, relative_sign};
use common::{Candle, PipelineError, PipelineResult, Regime, RegimeAssessment, VolatilityBucket};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lower bound on the lookback the classifier accepts
pub const MIN_LOOKBACK: usize = 50;

/// Indicator periods and bucket thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub short_period: usize,
    pub medium_period: usize,
    pub long_period: usize,
    pub rsi_period: usize,
    pub band_period: usize,
    pub band_std_multiplier: f64,
    /// Per-candle log-return volatility below which the market is quiet
    pub low_volatility: f64,
    pub high_volatility: f64,
    pub extreme_volatility: f64,
    /// |trend_strength| at or above this is a momentum regime
    pub strong_trend: f64,
    /// |trend_strength| below this has no directional bias
    pub weak_trend: f64,
    /// Band width at or below this counts as a squeeze
    pub squeeze_band_width: f64,
    /// A regime change needs at least this confidence to replace the previous one
    pub hysteresis_confidence: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            short_period: 10,
            medium_period: 20,
            long_period: 50,
            rsi_period: 14,
            band_period: 20,
            band_std_multiplier: 2.0,
            low_volatility: 0.004,
            high_volatility: 0.015,
            extreme_volatility: 0.035,
            strong_trend: 0.6,
            weak_trend: 0.2,
            squeeze_band_width: 0.02,
            hysteresis_confidence: 0.6,
        }
    }
}

/// Static per-regime parameters consumed by consensus and quality scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeProfile {
    /// Long (or short) share of vote weight that must be exceeded, 0.40 to 0.60
    pub consensus_threshold: f64,
    /// Points added to confidence and agreement, -5 to +10
    pub quality_adjustment: f64,
    /// Strategies that fit this regime (vote weight x1.5)
    #[serde(default)]
    pub recommended: Vec<String>,
    /// Strategies known to misfire in this regime (vote weight x0.5)
    #[serde(default)]
    pub excluded: Vec<String>,
}

/// How a strategy relates to the current regime's profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyAffinity {
    Recommended,
    Excluded,
    Unclassified,
}

impl RegimeProfile {
    pub const THRESHOLD_RANGE: (f64, f64) = (0.40, 0.60);
    pub const ADJUSTMENT_RANGE: (f64, f64) = (-5.0, 10.0);

    fn new(threshold: f64, adjustment: f64, recommended: &[&str], excluded: &[&str]) -> Self {
        Self {
            consensus_threshold: threshold,
            quality_adjustment: adjustment,
            recommended: recommended.iter().map(|s| s.to_string()).collect(),
            excluded: excluded.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn affinity(&self, strategy_id: &str) -> StrategyAffinity {
        if self.recommended.iter().any(|s| s == strategy_id) {
            StrategyAffinity::Recommended
        } else if self.excluded.iter().any(|s| s == strategy_id) {
            StrategyAffinity::Excluded
        } else {
            StrategyAffinity::Unclassified
        }
    }

    fn validate(&self, regime: Regime) -> PipelineResult<()> {
        let (lo, hi) = Self::THRESHOLD_RANGE;
        if !(lo..=hi).contains(&self.consensus_threshold) {
            return Err(PipelineError::Config(format!(
                "{} consensus_threshold {} outside [{}, {}]",
                regime, self.consensus_threshold, lo, hi
            )));
        }
        let (lo, hi) = Self::ADJUSTMENT_RANGE;
        if !(lo..=hi).contains(&self.quality_adjustment) {
            return Err(PipelineError::Config(format!(
                "{} quality_adjustment {} outside [{}, {}]",
                regime, self.quality_adjustment, lo, hi
            )));
        }
        if let Some(s) = self.recommended.iter().find(|s| self.excluded.contains(s)) {
            return Err(PipelineError::Config(format!(
                "{} lists strategy {} as both recommended and excluded",
                regime, s
            )));
        }
        Ok(())
    }
}

/// Profile for every regime, laid out as named fields so it reads well in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeProfileTable {
    pub strong_up_momentum: RegimeProfile,
    pub strong_down_momentum: RegimeProfile,
    pub range_bullish: RegimeProfile,
    pub range_bearish: RegimeProfile,
    pub choppy: RegimeProfile,
    pub volatile_breakout: RegimeProfile,
    pub low_vol_accumulation: RegimeProfile,
}

impl Default for RegimeProfileTable {
    fn default() -> Self {
        // range_bounce, support_resistance and order_flow are detectors supplied through
        // StrategySource by the host; the built-in panel does not implement them
        let momentum = ["momentum_surge", "trend_following", "breakout"];
        let range = ["mean_reversion", "range_bounce", "support_resistance"];
        Self {
            strong_up_momentum: RegimeProfile::new(0.42, 10.0, &momentum, &["mean_reversion"]),
            strong_down_momentum: RegimeProfile::new(0.42, 10.0, &momentum, &["mean_reversion"]),
            range_bullish: RegimeProfile::new(0.50, 5.0, &range, &["breakout"]),
            range_bearish: RegimeProfile::new(0.50, 5.0, &range, &["breakout"]),
            choppy: RegimeProfile::new(
                0.58,
                -5.0,
                &["mean_reversion"],
                &["trend_following", "momentum_surge"],
            ),
            volatile_breakout: RegimeProfile::new(
                0.55,
                0.0,
                &["breakout", "volume_spike"],
                &["mean_reversion"],
            ),
            low_vol_accumulation: RegimeProfile::new(
                0.52,
                2.0,
                &["volume_spike", "order_flow"],
                &["momentum_surge"],
            ),
        }
    }
}

impl RegimeProfileTable {
    pub fn get(&self, regime: Regime) -> &RegimeProfile {
        match regime {
            Regime::StrongUpMomentum => &self.strong_up_momentum,
            Regime::StrongDownMomentum => &self.strong_down_momentum,
            Regime::RangeBullish => &self.range_bullish,
            Regime::RangeBearish => &self.range_bearish,
            Regime::Choppy => &self.choppy,
            Regime::VolatileBreakout => &self.volatile_breakout,
            Regime::LowVolAccumulation => &self.low_vol_accumulation,
        }
    }

    pub fn get_mut(&mut self, regime: Regime) -> &mut RegimeProfile {
        match regime {
            Regime::StrongUpMomentum => &mut self.strong_up_momentum,
            Regime::StrongDownMomentum => &mut self.strong_down_momentum,
            Regime::RangeBullish => &mut self.range_bullish,
            Regime::RangeBearish => &mut self.range_bearish,
            Regime::Choppy => &mut self.choppy,
            Regime::VolatileBreakout => &mut self.volatile_breakout,
            Regime::LowVolAccumulation => &mut self.low_vol_accumulation,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        for regime in Regime::ALL {
            self.get(regime).validate(regime)?;
        }
        Ok(())
    }
}

/// Classifies candle history into a market regime
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify the last `lookback` candles.
    ///
    /// `previous` is the last assessment for the same symbol; a low-confidence
    /// change of regime keeps the previous label.
    pub fn classify(
        &self,
        candles: &[Candle],
        lookback: usize,
        previous: Option<&RegimeAssessment>,
    ) -> PipelineResult<RegimeAssessment> {
        let required = lookback.max(MIN_LOOKBACK).max(self.config.long_period);
        if candles.len() < required {
            return Err(PipelineError::InsufficientData {
                required,
                available: candles.len(),
            });
        }

        let closes: Vec<f64> = candles[candles.len() - required..]
            .iter()
            .map(|c| c.close)
            .collect();
        let insufficient = || PipelineError::InsufficientData {
            required,
            available: candles.len(),
        };

        let close = *closes.last().ok_or_else(insufficient)?;
        let short = indicators::sma(&closes, self.config.short_period).ok_or_else(insufficient)?;
        let medium = indicators::sma(&closes, self.config.medium_period).ok_or_else(insufficient)?;
        let long = indicators::sma(&closes, self.config.long_period).ok_or_else(insufficient)?;
        let rsi = indicators::rsi(&closes, self.config.rsi_period).unwrap_or(50.0);
        let volatility = indicators::return_volatility(&closes).unwrap_or(0.0);
        let band_width =
            indicators::band_width(&closes, self.config.band_period, self.config.band_std_multiplier)
                .unwrap_or(0.0);

        let alignment = (relative_sign(close, short)
            + relative_sign(short, medium)
            + relative_sign(medium, long))
            / 3.0;
        let momentum = (rsi - 50.0) / 50.0;
        let trend_strength = (0.6 * alignment + 0.4 * momentum).clamp(-1.0, 1.0);

        let volatility_bucket = self.bucket(volatility);
        let (regime, confidence) = self.map_regime(trend_strength, volatility_bucket, volatility, band_width);

        let raw = RegimeAssessment {
            regime,
            confidence: confidence.clamp(0.0, 1.0),
            volatility_bucket,
            volatility_score: volatility,
            trend_strength,
            band_width,
        };

        debug!(
            regime = %raw.regime,
            confidence = raw.confidence,
            trend = trend_strength,
            volatility = volatility,
            band_width = band_width,
            "Regime classified"
        );

        Ok(self.apply_hysteresis(raw, previous))
    }

    pub fn bucket(&self, volatility: f64) -> VolatilityBucket {
        match volatility {
            v if v >= self.config.extreme_volatility => VolatilityBucket::Extreme,
            v if v >= self.config.high_volatility => VolatilityBucket::High,
            v if v >= self.config.low_volatility => VolatilityBucket::Normal,
            _ => VolatilityBucket::Low,
        }
    }

    /// Threshold table from (trend, volatility, band width) to regime and confidence
    fn map_regime(
        &self,
        trend: f64,
        bucket: VolatilityBucket,
        volatility: f64,
        band_width: f64,
    ) -> (Regime, f64) {
        let cfg = &self.config;
        let strength = trend.abs();
        let unit = |x: f64| x.clamp(0.0, 1.0);

        if bucket == VolatilityBucket::Extreme {
            let excess = (volatility - cfg.extreme_volatility) / cfg.extreme_volatility;
            return (Regime::VolatileBreakout, 0.6 + 0.4 * unit(excess));
        }

        if strength >= cfg.strong_trend {
            let regime = if trend > 0.0 {
                Regime::StrongUpMomentum
            } else {
                Regime::StrongDownMomentum
            };
            let margin = (strength - cfg.strong_trend) / (1.0 - cfg.strong_trend).max(f64::EPSILON);
            return (regime, 0.6 + 0.4 * unit(margin));
        }

        if bucket == VolatilityBucket::Low && band_width <= cfg.squeeze_band_width {
            let squeeze = 1.0 - band_width / cfg.squeeze_band_width.max(f64::EPSILON);
            return (Regime::LowVolAccumulation, 0.6 + 0.4 * unit(squeeze));
        }

        if bucket == VolatilityBucket::High && strength < cfg.weak_trend {
            let flatness = 1.0 - strength / cfg.weak_trend.max(f64::EPSILON);
            return (Regime::Choppy, 0.55 + 0.35 * unit(flatness));
        }

        if strength >= cfg.weak_trend {
            let regime = if trend > 0.0 {
                Regime::RangeBullish
            } else {
                Regime::RangeBearish
            };
            let margin = (strength - cfg.weak_trend) / (cfg.strong_trend - cfg.weak_trend).max(f64::EPSILON);
            return (regime, 0.5 + 0.3 * unit(margin));
        }

        let flatness = 1.0 - strength / cfg.weak_trend.max(f64::EPSILON);
        (Regime::Choppy, 0.45 + 0.2 * unit(flatness))
    }

    fn apply_hysteresis(
        &self,
        raw: RegimeAssessment,
        previous: Option<&RegimeAssessment>,
    ) -> RegimeAssessment {
        match previous {
            Some(prev)
                if prev.regime != raw.regime && raw.confidence < self.config.hysteresis_confidence =>
            {
                debug!(
                    previous = %prev.regime,
                    candidate = %raw.regime,
                    confidence = raw.confidence,
                    "Regime change below hysteresis, keeping previous"
                );
                RegimeAssessment {
                    regime: prev.regime,
                    confidence: ((prev.confidence + raw.confidence) / 2.0).clamp(0.0, 1.0),
                    ..raw
                }
            }
            _ => raw,
        }
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}
