// Technical indicators over candle closes
// All functions return None when the input is too short to be meaningful

use common::Candle;
use statrs::statistics::Statistics;

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative strength index with Wilder smoothing, 0 to 100
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().filter(|c| **c < 0.0).map(|c| c.abs()).sum::<f64>() / period as f64;

    for change in rest {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Log returns between consecutive closes. Non-positive prices are skipped.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Sample standard deviation of log returns
pub fn return_volatility(closes: &[f64]) -> Option<f64> {
    let returns = log_returns(closes);
    if returns.len() < 2 {
        return None;
    }
    let sd = returns.iter().std_dev();
    sd.is_finite().then_some(sd)
}

/// Bollinger band width: (upper - lower) / middle over the last `period` closes
pub fn band_width(closes: &[f64], period: usize, std_multiplier: f64) -> Option<f64> {
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mid = window.iter().mean();
    if !mid.is_finite() || mid <= 0.0 {
        return None;
    }
    let sd = window.iter().population_std_dev();
    Some(2.0 * std_multiplier * sd / mid)
}

/// Average true range over the last `period` candles
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let total: f64 = (start..candles.len())
        .map(|i| candles[i].true_range(Some(candles[i - 1].close)))
        .sum();
    Some(total / period as f64)
}

/// -1, 0 or 1 with a relative dead band so float noise does not flip signs
pub(crate) fn relative_sign(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs()).max(f64::MIN_POSITIVE);
    let diff = a - b;
    if diff.abs() <= scale * 1e-9 {
        0.0
    } else {
        diff.signum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 2), Some(4.5));
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);

        let flat = vec![100.0; 30];
        assert_eq!(rsi(&flat, 14), Some(50.0));
    }

    #[test]
    fn test_volatility_of_constant_growth_is_zero() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        assert!(return_volatility(&closes).unwrap() < 1e-9);
    }

    #[test]
    fn test_band_width_flat_market() {
        let closes = vec![50.0; 25];
        assert_eq!(band_width(&closes, 20, 2.0), Some(0.0));
    }

    #[test]
    fn test_relative_sign_dead_band() {
        assert_eq!(relative_sign(100.0, 100.0 + 1e-12), 0.0);
        assert_eq!(relative_sign(101.0, 100.0), 1.0);
        assert_eq!(relative_sign(99.0, 100.0), -1.0);
    }
}
