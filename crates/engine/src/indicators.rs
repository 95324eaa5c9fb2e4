//! Technical indicators over candle series
//!
//! Every calculation is a pure function over the most recent bars and returns
//! `None` (or an "unknown"/neutral value) when there is not enough history.
//! EMA, MACD, Bollinger Bands and SMA run on the `ta` crate; RSI and ATR use
//! plain means over the last `period` deltas / true ranges.

use crate::types::Candle;
use serde::{Deserialize, Serialize};
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    SimpleMovingAverage,
};
use ta::Next;

/// Minimum number of candles for a full indicator bundle
pub const MIN_CANDLES: usize = 50;

// ============================================================================
// Output types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width as a percentage of the middle band
    pub bandwidth: f64,
    /// Where the last close sits between the bands, 0 (lower) to 100 (upper)
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticValue {
    pub k: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub avg_volume: f64,
    /// Last volume relative to the average, in percent
    pub current_vs_avg: f64,
    pub trend: VolumeTrend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    /// Nearest first, descending
    pub support_levels: Vec<f64>,
    /// Nearest first, ascending
    pub resistance_levels: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendStrength {
    pub direction: TrendDirection,
    pub strength: f64,
    pub consistency: f64,
}

/// Every indicator computed for one symbol/timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub current_price: f64,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger_bands: Option<BollingerValue>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub sma_20: Option<f64>,
    pub atr: Option<f64>,
    pub stochastic: Option<StochasticValue>,
    pub volume_profile: VolumeProfile,
    pub support_resistance: SupportResistance,
    pub trend: TrendStrength,
}

// ============================================================================
// Helpers
// ============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn last_n<T>(values: &[T], n: usize) -> &[T] {
    &values[values.len().saturating_sub(n)..]
}

// ============================================================================
// Oscillators
// ============================================================================

/// Relative Strength Index from the mean gain / mean loss of the last `period` moves
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = last_n(&deltas, period);

    let avg_gain = recent.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let avg_loss = recent.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line and histogram at the last close
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    if closes.len() < slow + signal {
        return None;
    }

    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;
    let mut last = None;
    for &close in closes {
        last = Some(indicator.next(close));
    }

    last.map(|out| MacdValue {
        macd: out.macd,
        signal: out.signal,
        histogram: out.histogram,
    })
}

/// Stochastic oscillator. %D is the mean of the last three %K readings when
/// there is enough history, otherwise it equals %K.
pub fn stochastic(candles: &[Candle], period: usize) -> Option<StochasticValue> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let k_at = |end: usize| -> f64 {
        let window = &candles[end + 1 - period..=end];
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if highest == lowest {
            50.0
        } else {
            (candles[end].close - lowest) / (highest - lowest) * 100.0
        }
    };

    let last = candles.len() - 1;
    let k = k_at(last);
    let d = if candles.len() >= period + 2 {
        (k_at(last - 2) + k_at(last - 1) + k) / 3.0
    } else {
        k
    };

    Some(StochasticValue { k, d })
}

// ============================================================================
// Moving averages and bands
// ============================================================================

pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let mut indicator = ExponentialMovingAverage::new(period).ok()?;
    closes.iter().map(|&c| indicator.next(c)).last()
}

pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let mut indicator = SimpleMovingAverage::new(period).ok()?;
    last_n(closes, period).iter().map(|&c| indicator.next(c)).last()
}

/// Bollinger Bands over the last `period` closes (population standard deviation)
pub fn bollinger_bands(closes: &[f64], period: usize, std_dev: f64) -> Option<BollingerValue> {
    if closes.len() < period {
        return None;
    }

    let mut indicator = BollingerBands::new(period, std_dev).ok()?;
    let out = last_n(closes, period)
        .iter()
        .map(|&c| indicator.next(c))
        .last()?;

    let current = *closes.last()?;
    let bandwidth = if out.average != 0.0 {
        (out.upper - out.lower) / out.average * 100.0
    } else {
        0.0
    };
    let position = if out.upper != out.lower {
        (current - out.lower) / (out.upper - out.lower) * 100.0
    } else {
        50.0
    };

    Some(BollingerValue {
        upper: out.upper,
        middle: out.average,
        lower: out.lower,
        bandwidth,
        position,
    })
}

// ============================================================================
// Volatility and volume
// ============================================================================

/// Average True Range: plain mean of the last `period` true ranges
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();

    Some(mean(last_n(&true_ranges, period)))
}

pub fn volume_profile(volumes: &[f64], period: usize) -> VolumeProfile {
    if period < 2 || volumes.len() < period {
        return VolumeProfile {
            avg_volume: 0.0,
            current_vs_avg: 0.0,
            trend: VolumeTrend::Unknown,
        };
    }

    let recent = last_n(volumes, period);
    let avg_volume = mean(recent);
    let current = recent[recent.len() - 1];
    let current_vs_avg = if avg_volume > 0.0 {
        (current - avg_volume) / avg_volume * 100.0
    } else {
        0.0
    };

    let (first, second) = recent.split_at(period / 2);
    let (first_half, second_half) = (mean(first), mean(second));
    let trend = if second_half > first_half * 1.2 {
        VolumeTrend::Increasing
    } else if second_half < first_half * 0.8 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Stable
    };

    VolumeProfile {
        avg_volume,
        current_vs_avg,
        trend,
    }
}

// ============================================================================
// Structure
// ============================================================================

/// Group sorted prices into clusters; a gap of 2% of `reference` or more starts a new one
fn cluster_means(sorted: &[f64], reference: f64) -> Vec<f64> {
    let threshold = reference * 0.02;
    let mut clusters = Vec::new();
    let mut current: Vec<f64> = Vec::new();

    for &price in sorted {
        match current.last() {
            Some(&prev) if (price - prev).abs() >= threshold => {
                clusters.push(mean(&current));
                current = vec![price];
            }
            _ => current.push(price),
        }
    }
    if !current.is_empty() {
        clusters.push(mean(&current));
    }
    clusters
}

/// Support and resistance levels from clustered highs / lows of the last 100 bars
pub fn support_resistance(candles: &[Candle], num_levels: usize) -> SupportResistance {
    if candles.len() < MIN_CANDLES {
        return SupportResistance::default();
    }

    let current = candles[candles.len() - 1].close;
    let recent = last_n(candles, 100);

    let mut above: Vec<f64> = recent.iter().map(|c| c.high).filter(|&h| h > current).collect();
    above.sort_by(|a, b| a.total_cmp(b));
    let mut resistance_levels = cluster_means(&above, current);
    resistance_levels.sort_by(|a, b| a.total_cmp(b));
    resistance_levels.truncate(num_levels);

    let mut below: Vec<f64> = recent.iter().map(|c| c.low).filter(|&l| l < current).collect();
    below.sort_by(|a, b| b.total_cmp(a));
    let mut support_levels = cluster_means(&below, current);
    support_levels.sort_by(|a, b| b.total_cmp(a));
    support_levels.truncate(num_levels);

    SupportResistance {
        support_levels,
        resistance_levels,
    }
}

/// Linear-regression trend over the last `period` closes
pub fn trend_strength(closes: &[f64], period: usize) -> TrendStrength {
    let neutral = TrendStrength {
        direction: TrendDirection::Neutral,
        strength: 0.0,
        consistency: 0.0,
    };
    if period < 2 || closes.len() < period {
        return neutral;
    }

    let y = last_n(closes, period);
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(y);

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (v - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    if y_mean == 0.0 {
        return neutral;
    }
    let normalized = slope / y_mean * 100.0;

    let direction = if normalized > 0.5 {
        TrendDirection::Uptrend
    } else if normalized < -0.5 {
        TrendDirection::Downtrend
    } else {
        TrendDirection::Neutral
    };

    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        ss_res += (v - predicted).powi(2);
        ss_tot += (v - y_mean).powi(2);
    }
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    TrendStrength {
        direction,
        strength: (normalized.abs() * 10.0).min(100.0),
        consistency: (r_squared * 100.0).max(0.0),
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Compute the full indicator set. Fewer than 50 candles yields `None`.
pub fn calculate_all(candles: &[Candle]) -> Option<IndicatorBundle> {
    if candles.len() < MIN_CANDLES {
        tracing::warn!(count = candles.len(), "Not enough candles for technical analysis");
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    Some(IndicatorBundle {
        current_price: closes[closes.len() - 1],
        rsi: rsi(&closes, 14),
        macd: macd(&closes, 12, 26, 9),
        bollinger_bands: bollinger_bands(&closes, 20, 2.0),
        ema_20: ema(&closes, 20),
        ema_50: ema(&closes, 50),
        ema_200: ema(&closes, 200),
        sma_20: sma(&closes, 20),
        atr: atr(candles, 14),
        stochastic: stochastic(candles, 14),
        volume_profile: volume_profile(&volumes, 20),
        support_resistance: support_resistance(candles, 3),
        trend: trend_strength(&closes, 20),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Candles with high/low one unit around the close
    pub(crate) fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle {
                open_time: (i as i64) * 3_600_000,
                open: p,
                high: p + 1.0,
                low: p - 1.0,
                close: p,
                volume: 100.0,
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_rsi_bounds_and_flat_losses() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert!(approx(rsi(&falling, 14).unwrap(), 0.0));

        assert_eq!(rsi(&rising[..14], 14), None);
    }

    #[test]
    fn test_rsi_uses_simple_means() {
        // 14 deltas alternating +2 / -1: mean gain 1.0, mean loss 0.5
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = closes[closes.len() - 1];
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let value = rsi(&closes, 14).unwrap();
        assert!(approx(value, 100.0 - 100.0 / 3.0));
    }

    #[test]
    fn test_macd_requires_history_and_tracks_trend() {
        let short: Vec<f64> = (0..34).map(|i| i as f64).collect();
        assert!(macd(&short, 12, 26, 9).is_none());

        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 2.0).collect();
        let value = macd(&rising, 12, 26, 9).unwrap();
        assert!(value.macd > 0.0);
        assert!(approx(value.histogram, value.macd - value.signal));
    }

    #[test]
    fn test_ema_seeds_with_first_value() {
        let closes = [10.0, 20.0, 30.0];
        // k = 0.5: 10 -> 15 -> 22.5
        assert!(approx(ema(&closes, 3).unwrap(), 22.5));
        assert!(ema(&closes, 4).is_none());
        assert!(approx(sma(&closes, 2).unwrap(), 25.0));
    }

    #[test]
    fn test_bollinger_flat_series() {
        let flat = vec![50.0; 25];
        let bb = bollinger_bands(&flat, 20, 2.0).unwrap();
        assert!(approx(bb.middle, 50.0));
        assert_eq!(bb.position, 50.0);
        assert!(approx(bb.bandwidth, 0.0));
    }

    #[test]
    fn test_bollinger_position_at_top() {
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        let bb = bollinger_bands(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle && bb.middle > bb.lower);
        assert!(bb.position > 90.0);
    }

    #[test]
    fn test_atr_mean_true_range() {
        let candles = make_candles(&vec![100.0; 20]);
        assert!(approx(atr(&candles, 14).unwrap(), 2.0));
        assert!(atr(&candles[..14], 14).is_none());
    }

    #[test]
    fn test_stochastic_k_and_d() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let stoch = stochastic(&make_candles(&prices), 14).unwrap();
        // close is one below the highest high of the window
        assert!(stoch.k > 90.0 && stoch.k < 100.0);
        assert!(approx(stoch.d, stoch.k));

        let short = stochastic(&make_candles(&prices[..14]), 14).unwrap();
        assert_eq!(short.k, short.d);
    }

    #[test]
    fn test_volume_profile_trend() {
        let mut volumes = vec![100.0; 10];
        volumes.extend(vec![200.0; 10]);
        let profile = volume_profile(&volumes, 20);
        assert_eq!(profile.trend, VolumeTrend::Increasing);
        assert!(approx(profile.avg_volume, 150.0));
        assert!(approx(profile.current_vs_avg, 100.0 / 3.0));

        assert_eq!(volume_profile(&volumes[..5], 20).trend, VolumeTrend::Unknown);
    }

    #[test]
    fn test_support_resistance_clusters() {
        let mut prices = vec![100.0; 40];
        prices.extend(vec![120.0; 5]);
        prices.extend(vec![80.0; 5]);
        prices.push(100.0);
        let sr = support_resistance(&make_candles(&prices), 3);

        // flat bars leave wicks at 101 / 99; the spikes form their own clusters
        assert_eq!(sr.resistance_levels, vec![101.0, 121.0]);
        assert_eq!(sr.support_levels, vec![99.0, 79.0]);

        assert_eq!(
            support_resistance(&make_candles(&prices[..49]), 3),
            SupportResistance::default()
        );
    }

    #[test]
    fn test_trend_strength_direction() {
        let up: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        let trend = trend_strength(&up, 20);
        assert_eq!(trend.direction, TrendDirection::Uptrend);
        assert!(approx(trend.consistency, 100.0));
        assert!(trend.strength > 10.0);

        let flat = vec![100.0; 20];
        let trend = trend_strength(&flat, 20);
        assert_eq!(trend.direction, TrendDirection::Neutral);
        assert_eq!(trend.consistency, 0.0);
    }

    #[test]
    fn test_calculate_all_requires_fifty_candles() {
        let prices: Vec<f64> = (0..49).map(|i| 100.0 + (i as f64).sin()).collect();
        assert!(calculate_all(&make_candles(&prices)).is_none());

        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).sin()).collect();
        let bundle = calculate_all(&make_candles(&prices)).unwrap();
        assert_eq!(bundle.current_price, prices[59]);
        assert!(bundle.rsi.is_some());
        assert!(bundle.ema_50.is_some());
        assert!(bundle.ema_200.is_none());
    }
}
