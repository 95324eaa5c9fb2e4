//! Multi-factor setup scoring
//!
//! Six component scorers each return a bounded score and a bias. The total is
//! their sum (clamped to 100); the direction is decided by comparing the
//! bullish and bearish sums.

use crate::indicators::{
    BollingerValue, IndicatorBundle, MacdValue, SupportResistance, TrendDirection, TrendStrength,
    VolumeProfile, VolumeTrend,
};
use crate::types::{Direction, SignalBias};
use serde::{Deserialize, Serialize};

/// Dominant side must exceed this sum to pick a direction
const DIRECTION_THRESHOLD: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub score: f64,
    pub signal: SignalBias,
    pub reason: String,
}

impl ComponentScore {
    fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            signal: SignalBias::Neutral,
            reason: reason.into(),
        }
    }
}

/// Per-component breakdown, in scoring order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub rsi: ComponentScore,
    pub macd: ComponentScore,
    pub bollinger: ComponentScore,
    pub trend: ComponentScore,
    pub volume: ComponentScore,
    pub support_resistance: ComponentScore,
}

impl ScoreComponents {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ComponentScore)> {
        [
            ("RSI", &self.rsi),
            ("MACD", &self.macd),
            ("BOLLINGER", &self.bollinger),
            ("TREND", &self.trend),
            ("VOLUME", &self.volume),
            ("SUPPORT_RESISTANCE", &self.support_resistance),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total_score: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub components: ScoreComponents,
    pub confluences: Vec<String>,
    pub warnings: Vec<String>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// Component scorers
// ============================================================================

pub fn score_rsi(rsi: Option<f64>) -> ComponentScore {
    let Some(rsi) = rsi else {
        return ComponentScore::neutral("RSI not available");
    };

    if rsi < 30.0 {
        ComponentScore {
            score: ((30.0 - rsi) * 2.0).min(30.0),
            signal: SignalBias::Bullish,
            reason: format!("RSI oversold at {rsi:.1}"),
        }
    } else if rsi > 70.0 {
        ComponentScore {
            score: ((rsi - 70.0) * 2.0).min(30.0),
            signal: SignalBias::Bearish,
            reason: format!("RSI overbought at {rsi:.1}"),
        }
    } else {
        ComponentScore::neutral(format!("RSI neutral at {rsi:.1}"))
    }
}

pub fn score_macd(macd: Option<&MacdValue>) -> ComponentScore {
    let Some(m) = macd else {
        return ComponentScore::neutral("MACD not available");
    };

    let mut score = 0.0;
    let mut signal = SignalBias::Neutral;
    let mut reasons = Vec::new();

    if m.histogram > 0.0 && m.macd > m.signal {
        score += 20.0;
        signal = SignalBias::Bullish;
        reasons.push("MACD bullish crossover".to_string());
    } else if m.histogram < 0.0 && m.macd < m.signal {
        score += 20.0;
        signal = SignalBias::Bearish;
        reasons.push("MACD bearish crossover".to_string());
    }

    if m.histogram.abs() > 0.1 {
        score += 10.0;
        reasons.push(format!("Strong histogram ({:.2})", m.histogram));
    }

    ComponentScore {
        score: f64::min(score, 30.0),
        signal,
        reason: joined_or(reasons, "MACD neutral"),
    }
}

pub fn score_bollinger(bb: Option<&BollingerValue>) -> ComponentScore {
    let Some(bb) = bb else {
        return ComponentScore::neutral("BB not available");
    };

    let mut score = 0.0;
    let mut signal = SignalBias::Neutral;
    let mut reasons = Vec::new();

    if bb.position < 10.0 {
        score += 25.0;
        signal = SignalBias::Bullish;
        reasons.push("Price at lower BB".to_string());
    } else if bb.position > 90.0 {
        score += 25.0;
        signal = SignalBias::Bearish;
        reasons.push("Price at upper BB".to_string());
    }

    if bb.bandwidth < 5.0 {
        score += 10.0;
        reasons.push("BB squeeze detected".to_string());
    }

    ComponentScore {
        score: f64::min(score, 25.0),
        signal,
        reason: joined_or(reasons, "Price in BB middle"),
    }
}

pub fn score_trend(trend: &TrendStrength) -> ComponentScore {
    let (signal, label) = match trend.direction {
        TrendDirection::Neutral => return ComponentScore::neutral("No clear trend"),
        TrendDirection::Uptrend => (SignalBias::Bullish, "Uptrend"),
        TrendDirection::Downtrend => (SignalBias::Bearish, "Downtrend"),
    };

    ComponentScore {
        score: (trend.strength * 0.3 + trend.consistency * 0.2).min(20.0),
        signal,
        reason: format!(
            "{label} (strength: {:.0}, consistency: {:.0})",
            trend.strength, trend.consistency
        ),
    }
}

pub fn score_volume(volume: &VolumeProfile) -> ComponentScore {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if volume.current_vs_avg > 50.0 {
        score += 15.0;
        reasons.push(format!("High volume (+{:.0}% vs avg)", volume.current_vs_avg));
    } else if volume.current_vs_avg > 20.0 {
        score += 10.0;
        reasons.push(format!("Elevated volume (+{:.0}%)", volume.current_vs_avg));
    }

    if volume.trend == VolumeTrend::Increasing {
        score += 5.0;
        reasons.push("Volume increasing".to_string());
    }

    ComponentScore {
        score: f64::min(score, 15.0),
        signal: SignalBias::Confirmation,
        reason: joined_or(reasons, "Normal volume"),
    }
}

pub fn score_support_resistance(sr: &SupportResistance, current_price: f64) -> ComponentScore {
    if current_price <= 0.0 {
        return ComponentScore::neutral("S/R data not available");
    }

    let near = |level: f64| ((current_price - level) / current_price * 100.0).abs() < 2.0;
    let mut score = 0.0;
    let mut signal = SignalBias::Neutral;
    let mut reasons = Vec::new();

    if let Some(support) = sr.support_levels.iter().copied().find(|&s| near(s)) {
        score += 20.0;
        signal = SignalBias::Bullish;
        reasons.push(format!("Near support at ${support:.2}"));
    }
    if let Some(resistance) = sr.resistance_levels.iter().copied().find(|&r| near(r)) {
        score += 20.0;
        signal = SignalBias::Bearish;
        reasons.push(format!("Near resistance at ${resistance:.2}"));
    }

    ComponentScore {
        score: f64::min(score, 20.0),
        signal,
        reason: joined_or(reasons, "No nearby S/R levels"),
    }
}

fn joined_or(reasons: Vec<String>, fallback: &str) -> String {
    if reasons.is_empty() {
        fallback.to_string()
    } else {
        reasons.join(", ")
    }
}

// ============================================================================
// Total
// ============================================================================

pub fn calculate_total_score(bundle: &IndicatorBundle) -> ScoreResult {
    let components = ScoreComponents {
        rsi: score_rsi(bundle.rsi),
        macd: score_macd(bundle.macd.as_ref()),
        bollinger: score_bollinger(bundle.bollinger_bands.as_ref()),
        trend: score_trend(&bundle.trend),
        volume: score_volume(&bundle.volume_profile),
        support_resistance: score_support_resistance(
            &bundle.support_resistance,
            bundle.current_price,
        ),
    };

    let total: f64 = components.iter().map(|(_, c)| c.score).sum();
    let sum_for = |bias: SignalBias| -> f64 {
        components
            .iter()
            .filter(|(_, c)| c.signal == bias)
            .map(|(_, c)| c.score)
            .sum()
    };
    let bullish = sum_for(SignalBias::Bullish);
    let bearish = sum_for(SignalBias::Bearish);

    let (direction, confidence) = if bullish > bearish && bullish > DIRECTION_THRESHOLD {
        (Direction::Long, bullish / (bullish + bearish) * 100.0)
    } else if bearish > bullish && bearish > DIRECTION_THRESHOLD {
        (Direction::Short, bearish / (bullish + bearish) * 100.0)
    } else {
        (Direction::Neutral, 0.0)
    };

    let supporting = direction.supporting_bias();
    let mut confluences = Vec::new();
    let mut warnings = Vec::new();

    for (name, comp) in components.iter() {
        if comp.score <= 0.0 {
            continue;
        }
        let agrees = match comp.signal {
            SignalBias::Confirmation => supporting.is_some(),
            bias => Some(bias) == supporting,
        };
        if agrees {
            confluences.push(format!("{name}: {}", comp.reason));
        } else if matches!(comp.signal, SignalBias::Bullish | SignalBias::Bearish) {
            warnings.push(format!("{name}: {}", comp.reason));
        }
    }

    ScoreResult {
        total_score: round1(total.min(100.0)),
        direction,
        confidence: round1(confidence.min(100.0)),
        components,
        confluences,
        warnings,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A bundle with nothing notable going on
    pub(crate) fn quiet_bundle(price: f64) -> IndicatorBundle {
        IndicatorBundle {
            current_price: price,
            rsi: Some(50.0),
            macd: None,
            bollinger_bands: None,
            ema_20: None,
            ema_50: None,
            ema_200: None,
            sma_20: None,
            atr: Some(price * 0.01),
            stochastic: None,
            volume_profile: VolumeProfile {
                avg_volume: 100.0,
                current_vs_avg: 0.0,
                trend: VolumeTrend::Stable,
            },
            support_resistance: SupportResistance::default(),
            trend: TrendStrength {
                direction: TrendDirection::Neutral,
                strength: 0.0,
                consistency: 0.0,
            },
        }
    }

    /// Oversold, at the lower band, with a bullish MACD and volume spike
    pub(crate) fn bullish_bundle(price: f64) -> IndicatorBundle {
        IndicatorBundle {
            rsi: Some(20.0),
            macd: Some(MacdValue {
                macd: 1.0,
                signal: 0.5,
                histogram: 0.5,
            }),
            bollinger_bands: Some(BollingerValue {
                upper: price * 1.1,
                middle: price * 1.05,
                lower: price,
                bandwidth: 19.0,
                position: 5.0,
            }),
            volume_profile: VolumeProfile {
                avg_volume: 100.0,
                current_vs_avg: 60.0,
                trend: VolumeTrend::Stable,
            },
            ..quiet_bundle(price)
        }
    }

    #[test]
    fn test_rsi_component() {
        let oversold = score_rsi(Some(20.0));
        assert_eq!(oversold.score, 20.0);
        assert_eq!(oversold.signal, SignalBias::Bullish);

        let extreme = score_rsi(Some(95.0));
        assert_eq!(extreme.score, 30.0);
        assert_eq!(extreme.signal, SignalBias::Bearish);

        assert_eq!(score_rsi(None).score, 0.0);
        assert_eq!(score_rsi(Some(50.0)).signal, SignalBias::Neutral);
    }

    #[test]
    fn test_bollinger_component_caps_at_25() {
        let bb = BollingerValue {
            upper: 101.0,
            middle: 100.0,
            lower: 99.0,
            bandwidth: 2.0,
            position: 95.0,
        };
        let c = score_bollinger(Some(&bb));
        assert_eq!(c.score, 25.0);
        assert_eq!(c.signal, SignalBias::Bearish);
        assert!(c.reason.contains("squeeze"));
    }

    #[test]
    fn test_support_resistance_prefers_resistance_signal() {
        let sr = SupportResistance {
            support_levels: vec![99.0],
            resistance_levels: vec![101.0],
        };
        let c = score_support_resistance(&sr, 100.0);
        assert_eq!(c.score, 20.0);
        assert_eq!(c.signal, SignalBias::Bearish);
    }

    #[test]
    fn test_total_score_long_with_confluences() {
        let result = calculate_total_score(&bullish_bundle(100.0));
        // rsi 20 + macd 30 + bb 25 + volume 15
        assert_eq!(result.total_score, 90.0);
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.confluences.len(), 4);
        assert!(result.confluences.iter().any(|c| c.starts_with("VOLUME")));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_opposing_component_becomes_warning() {
        let mut bundle = bullish_bundle(100.0);
        bundle.trend = TrendStrength {
            direction: TrendDirection::Downtrend,
            strength: 20.0,
            consistency: 50.0,
        };
        let result = calculate_total_score(&bundle);
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("TREND"));
        assert_eq!(result.total_score, 100.0);
    }

    #[test]
    fn test_quiet_market_is_neutral() {
        let result = calculate_total_score(&quiet_bundle(100.0));
        assert_eq!(result.direction, Direction::Neutral);
        assert_eq!(result.confidence, 0.0);
        assert!(result.confluences.is_empty());
    }
}
