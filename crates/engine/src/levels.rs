//! Entry, stop and target placement plus the human-readable recommendation

use crate::ai::AiValidation;
use crate::indicators::IndicatorBundle;
use crate::scoring::ScoreResult;
use crate::types::Direction;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade plan for a scored setup. Directional fields are `None` for NEUTRAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub target_1: Option<f64>,
    pub target_2: Option<f64>,
    pub risk_reward_t1: Option<f64>,
    pub risk_reward_t2: Option<f64>,
    pub risk_percent: Option<f64>,
    pub atr: Option<f64>,
}

/// Decimal places for a price of this magnitude
fn price_precision(price: f64) -> u32 {
    let abs = price.abs();
    if abs >= 100.0 {
        2
    } else if abs >= 1.0 {
        4
    } else {
        6
    }
}

fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(dp))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Round a price to the precision its magnitude calls for
pub fn round_price(price: f64) -> f64 {
    round_dp(price, price_precision(price))
}

pub fn calculate_trade_levels(bundle: &IndicatorBundle, direction: Direction) -> TradeLevels {
    let price = bundle.current_price;
    let atr = bundle.atr.unwrap_or(price * 0.02);
    let supports = &bundle.support_resistance.support_levels;
    let resistances = &bundle.support_resistance.resistance_levels;

    let (stop_loss, target_1, target_2) = match direction {
        Direction::Long => {
            let stop = supports
                .first()
                .map(|s| s - atr * 0.5)
                .unwrap_or(price - atr * 2.0);
            let (t1, t2) = match resistances.first() {
                Some(&r1) => (r1, resistances.get(1).copied().unwrap_or(r1 * 1.05)),
                None => (price + atr * 3.0, price + atr * 5.0),
            };
            (stop, t1, t2)
        }
        Direction::Short => {
            let stop = resistances
                .first()
                .map(|r| r + atr * 0.5)
                .unwrap_or(price + atr * 2.0);
            let (t1, t2) = match supports.first() {
                Some(&s1) => (s1, supports.get(1).copied().unwrap_or(s1 * 0.95)),
                None => (price - atr * 3.0, price - atr * 5.0),
            };
            (stop, t1, t2)
        }
        Direction::Neutral => {
            return TradeLevels {
                entry: round_price(price),
                stop_loss: None,
                target_1: None,
                target_2: None,
                risk_reward_t1: None,
                risk_reward_t2: None,
                risk_percent: None,
                atr: None,
            };
        }
    };

    let risk = (price - stop_loss).abs();
    let ratio = |target: f64| {
        if risk > 0.0 {
            (target - price).abs() / risk
        } else {
            0.0
        }
    };

    TradeLevels {
        entry: round_price(price),
        stop_loss: Some(round_price(stop_loss)),
        target_1: Some(round_price(target_1)),
        target_2: Some(round_price(target_2)),
        risk_reward_t1: Some(round_dp(ratio(target_1), 2)),
        risk_reward_t2: Some(round_dp(ratio(target_2), 2)),
        risk_percent: Some(round_dp(risk / price * 100.0, 2)),
        atr: Some(round_price(atr)),
    }
}

/// Final verdict text combining score, plan and AI review
pub fn generate_recommendation(
    score: &ScoreResult,
    levels: &TradeLevels,
    ai: Option<&AiValidation>,
) -> String {
    let total = score.total_score;

    if score.direction == Direction::Neutral || total < 50.0 {
        return "No clear trading opportunity at this time. Wait for a better setup.".to_string();
    }

    if let Some(ai) = ai.filter(|ai| !ai.valid) {
        return format!(
            "Technical score is {total:.0} but AI suggests caution: {}",
            ai.caution.as_deref().unwrap_or("Risk factors identified")
        );
    }

    let strength = if total >= 80.0 {
        "EXCELLENT"
    } else if total >= 70.0 {
        "STRONG"
    } else if total >= 60.0 {
        "GOOD"
    } else {
        "MODERATE"
    };

    let mut rec = format!(
        "{strength} {} opportunity (Score: {total:.0}, Confidence: {:.0}%)\n",
        score.direction, score.confidence
    );

    if let (Some(stop), Some(t1), Some(t2)) = (levels.stop_loss, levels.target_1, levels.target_2) {
        rec.push_str("\nTrade Plan:\n");
        rec.push_str(&format!("Entry: {}\n", levels.entry));
        rec.push_str(&format!(
            "Stop Loss: {stop} (Risk: {:.1}%)\n",
            levels.risk_percent.unwrap_or_default()
        ));
        rec.push_str(&format!(
            "Target 1: {t1} (R:R {:.1}:1)\n",
            levels.risk_reward_t1.unwrap_or_default()
        ));
        rec.push_str(&format!(
            "Target 2: {t2} (R:R {:.1}:1)\n",
            levels.risk_reward_t2.unwrap_or_default()
        ));
    }

    if let Some(insight) = ai.and_then(|ai| ai.recommendation.as_deref()) {
        rec.push_str(&format!("\nAI Insight: {insight}"));
    }

    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::SupportResistance;
    use crate::scoring::calculate_total_score;
    use crate::scoring::tests::{bullish_bundle, quiet_bundle};

    #[test]
    fn test_price_rounding_by_magnitude() {
        assert_eq!(round_price(1234.5678), 1234.57);
        assert_eq!(round_price(1.23456789), 1.2346);
        assert_eq!(round_price(0.000123456), 0.000123);
    }

    #[test]
    fn test_long_levels_from_atr() {
        let mut bundle = quiet_bundle(100.0);
        bundle.atr = Some(2.0);
        let levels = calculate_trade_levels(&bundle, Direction::Long);

        assert_eq!(levels.entry, 100.0);
        assert_eq!(levels.stop_loss, Some(96.0));
        assert_eq!(levels.target_1, Some(106.0));
        assert_eq!(levels.target_2, Some(110.0));
        assert_eq!(levels.risk_reward_t1, Some(1.5));
        assert_eq!(levels.risk_reward_t2, Some(2.5));
        assert_eq!(levels.risk_percent, Some(4.0));
    }

    #[test]
    fn test_short_levels_from_structure() {
        let mut bundle = quiet_bundle(100.0);
        bundle.atr = Some(2.0);
        bundle.support_resistance = SupportResistance {
            support_levels: vec![95.0],
            resistance_levels: vec![103.0, 110.0],
        };
        let levels = calculate_trade_levels(&bundle, Direction::Short);

        assert_eq!(levels.stop_loss, Some(104.0));
        assert_eq!(levels.target_1, Some(95.0));
        assert_eq!(levels.target_2, Some(90.25));
    }

    #[test]
    fn test_missing_atr_defaults_to_two_percent() {
        let mut bundle = quiet_bundle(50.0);
        bundle.atr = None;
        let levels = calculate_trade_levels(&bundle, Direction::Long);
        assert_eq!(levels.atr, Some(1.0));
        assert_eq!(levels.stop_loss, Some(48.0));
    }

    #[test]
    fn test_neutral_has_entry_only() {
        let levels = calculate_trade_levels(&quiet_bundle(100.0), Direction::Neutral);
        assert_eq!(levels.entry, 100.0);
        assert!(levels.stop_loss.is_none());
        assert!(levels.risk_reward_t1.is_none());
    }

    #[test]
    fn test_recommendation_variants() {
        let bundle = bullish_bundle(100.0);
        let score = calculate_total_score(&bundle);
        let levels = calculate_trade_levels(&bundle, score.direction);

        let rec = generate_recommendation(&score, &levels, None);
        assert!(rec.starts_with("EXCELLENT LONG"));
        assert!(rec.contains("Trade Plan"));

        let rejected = AiValidation {
            valid: false,
            validation_score: Some(3.0),
            risk_factors: vec![],
            opportunities: vec![],
            recommendation: None,
            caution: Some("Earnings tomorrow".into()),
        };
        let rec = generate_recommendation(&score, &levels, Some(&rejected));
        assert!(rec.contains("AI suggests caution: Earnings tomorrow"));

        let quiet = calculate_total_score(&quiet_bundle(100.0));
        let rec = generate_recommendation(&quiet, &levels, None);
        assert!(rec.starts_with("No clear trading opportunity"));
    }
}
