//! Telegram notifications: scan summaries, opportunities, closed trades

use crate::analysis::TradeSetup;
use crate::types::AssetClass;
use persistence::repository::{SetupRecord, TrackingStats};
use serde::Serialize;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html::escape;
use thiserror::Error;
use tracing::{error, info, warn};

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━";
const MESSAGE_GAP: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram is not configured")]
    NotConfigured,

    #[error("Telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

#[derive(Debug, Clone, Serialize)]
pub struct BotInfo {
    pub username: Option<String>,
    pub first_name: String,
    pub chat_id: i64,
}

#[derive(Clone)]
pub struct TelegramNotifier {
    target: Option<(Bot, ChatId)>,
}

impl TelegramNotifier {
    /// Disabled unless both the token and a numeric chat id are present
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        let (Some(token), Some(chat_id)) = (token, chat_id) else {
            warn!("Telegram not configured, notifications disabled");
            return Self::disabled();
        };
        match chat_id.trim().parse::<i64>() {
            Ok(id) => {
                info!(chat_id = id, "Telegram notifier ready");
                Self {
                    target: Some((Bot::new(token), ChatId(id))),
                }
            }
            Err(_) => {
                warn!(chat_id = %chat_id, "TELEGRAM_CHAT_ID is not numeric, notifications disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { target: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// `text` is Telegram HTML; dynamic parts must already be escaped
    pub async fn send_message(&self, text: &str) -> Result<(), TelegramError> {
        let (bot, chat_id) = self.target.as_ref().ok_or(TelegramError::NotConfigured)?;
        bot.send_message(*chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    /// Free text, escaped so it is delivered as written
    pub async fn send_text(&self, text: &str) -> Result<(), TelegramError> {
        self.send_message(&escape(text)).await
    }

    /// Send up to `max` setups one second apart; stops at the first failure.
    /// Returns how many were delivered.
    pub async fn send_opportunities(&self, setups: &[TradeSetup], max: usize) -> usize {
        let mut sent = 0;
        for setup in setups.iter().take(max) {
            if let Err(e) = self.send_message(&format_opportunity(setup)).await {
                error!(symbol = %setup.symbol, error = %e, "Failed to send opportunity");
                break;
            }
            sent += 1;
            tokio::time::sleep(MESSAGE_GAP).await;
        }
        info!(sent, total = setups.len(), "Opportunities sent to Telegram");
        sent
    }

    /// Summary first, then the top three setups
    pub async fn send_scan_complete(
        &self,
        setups: &[TradeSetup],
        preset: &str,
        total_scanned: usize,
    ) -> Result<(), TelegramError> {
        self.send_message(&format_scan_summary(setups, preset, total_scanned))
            .await?;
        if !setups.is_empty() {
            tokio::time::sleep(MESSAGE_GAP).await;
            self.send_opportunities(setups, 3).await;
        }
        Ok(())
    }

    pub async fn send_trade_closed(
        &self,
        setup: &SetupRecord,
        stats: &TrackingStats,
    ) -> Result<(), TelegramError> {
        self.send_message(&format_trade_closed(setup, stats)).await
    }

    pub async fn send_alert(&self, title: &str, body: &str) -> Result<(), TelegramError> {
        self.send_message(&format_alert(title, body)).await
    }

    /// `getMe` round trip
    pub async fn test_connection(&self) -> Result<BotInfo, TelegramError> {
        let (bot, chat_id) = self.target.as_ref().ok_or(TelegramError::NotConfigured)?;
        let me = bot.get_me().await?;
        Ok(BotInfo {
            username: me.user.username.clone(),
            first_name: me.user.first_name.clone(),
            chat_id: chat_id.0,
        })
    }
}

// ============================================================================
// Formatting
// ============================================================================

fn category(class: AssetClass) -> &'static str {
    match class {
        AssetClass::Crypto => "🪙 CRYPTO",
        AssetClass::Stock => "📈 STOCK",
        AssetClass::Index => "📊 INDEX",
        AssetClass::Commodity => "🥇 COMMODITY",
        AssetClass::Etf => "📈 ETF",
        AssetClass::Forex => "💱 FOREX",
    }
}

fn direction_emoji(direction: &str) -> &'static str {
    match direction {
        "LONG" => "📈",
        "SHORT" => "📉",
        _ => "➡️",
    }
}

fn score_emoji(score: f64) -> &'static str {
    match score {
        s if s >= 80.0 => "🔥",
        s if s >= 70.0 => "✅",
        s if s >= 60.0 => "👍",
        _ => "⚠️",
    }
}

fn price(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("${v}"))
}

fn ratio(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}:1"))
}

pub fn format_opportunity(setup: &TradeSetup) -> String {
    let levels = &setup.levels;
    let mut msg = format!(
        "{category}\n{SEPARATOR}\n\n\
         {score_emoji} <b>{symbol}</b> ({timeframe})\n\n\
         ⭐ <b>Score:</b> {score:.0}/100\n\
         {dir_emoji} <b>Direction:</b> {direction}\n\
         💪 <b>Confidence:</b> {confidence:.0}%\n\n\
         💰 <b>Trade Plan:</b>\n\
         ├ Entry: ${entry}\n\
         ├ Stop Loss: {stop}\n\
         ├ Target 1: {t1} (R:R {rr1})\n\
         └ Target 2: {t2} (R:R {rr2})\n",
        category = category(setup.asset_class),
        score_emoji = score_emoji(setup.score),
        symbol = escape(&setup.symbol),
        timeframe = setup.timeframe,
        score = setup.score,
        dir_emoji = direction_emoji(setup.direction.as_str()),
        direction = setup.direction,
        confidence = setup.confidence,
        entry = levels.entry,
        stop = price(levels.stop_loss),
        t1 = price(levels.target_1),
        rr1 = ratio(levels.risk_reward_t1),
        t2 = price(levels.target_2),
        rr2 = ratio(levels.risk_reward_t2),
    );

    if !setup.confluences.is_empty() {
        msg.push_str(&format!("\n✅ <b>Confluences ({}):</b>\n", setup.confluences.len()));
        for c in setup.confluences.iter().take(3) {
            msg.push_str(&format!("  • {}\n", escape(c)));
        }
    }

    if let Some(ai) = setup.ai_insights.as_ref().filter(|ai| ai.valid) {
        let score = ai.validation_score.unwrap_or_default();
        msg.push_str(&format!("\n🤖 <b>AI Validation:</b> {score:.0}/10\n"));
        if let Some(rec) = &ai.recommendation {
            let short: String = rec.chars().take(150).collect();
            msg.push_str(&format!("💡 {}\n", escape(&short)));
        }
    }

    msg.trim_end().to_string()
}

pub fn format_scan_summary(setups: &[TradeSetup], preset: &str, total_scanned: usize) -> String {
    let count = |classes: &[AssetClass]| {
        setups
            .iter()
            .filter(|s| classes.contains(&s.asset_class))
            .count()
    };

    let mut msg = format!(
        "🎯 <b>MARKET SCAN COMPLETE</b>\n{SEPARATOR}\n\n\
         📊 Preset: <b>{preset}</b>\n\
         🔍 Assets Scanned: <b>{total_scanned}</b>\n\
         ✅ Opportunities Found: <b>{found}</b>\n\n\
         <b>By Category:</b>\n\
         🪙 Crypto: {crypto}\n\
         📈 Stocks: {stocks}\n\
         📊 Indices: {indices}\n\
         🥇 Commodities: {commodities}\n\
         💱 Forex: {forex}\n",
        preset = escape(&preset.to_uppercase()),
        found = setups.len(),
        crypto = count(&[AssetClass::Crypto]),
        stocks = count(&[AssetClass::Stock, AssetClass::Etf]),
        indices = count(&[AssetClass::Index]),
        commodities = count(&[AssetClass::Commodity]),
        forex = count(&[AssetClass::Forex]),
    );

    if !setups.is_empty() {
        msg.push_str("\n<b>Top 3 Opportunities:</b>\n");
        for (i, s) in setups.iter().take(3).enumerate() {
            msg.push_str(&format!(
                "{}. {} - {} {} (Score: {:.0})\n",
                i + 1,
                escape(&s.symbol),
                direction_emoji(s.direction.as_str()),
                s.direction,
                s.score
            ));
        }
    }

    msg.trim_end().to_string()
}

pub fn format_trade_closed(setup: &SetupRecord, stats: &TrackingStats) -> String {
    let (emoji, headline, color) = match setup.status.as_str() {
        "hit_tp2" => ("🎯🎯", "TARGET 2 HIT", "🟢"),
        "hit_tp1" => ("🎯", "TARGET 1 HIT", "🟢"),
        "hit_sl" => ("🛑", "STOP LOSS HIT", "🔴"),
        "expired" => ("⏰", "TRADE EXPIRED", "⚪"),
        _ => ("ℹ️", "TRADE CLOSED", "⚪"),
    };

    let pl = setup.profit_loss_pct.unwrap_or_default();
    let pl_text = if pl > 0.0 {
        format!("+{pl:.2}%")
    } else {
        format!("{pl:.2}%")
    };
    let pl_emoji = match pl {
        p if p > 0.0 => "📈",
        p if p < 0.0 => "📉",
        _ => "➖",
    };
    let minutes = setup
        .closed_at
        .map(|closed| (closed - setup.created_at).max(0) / 60)
        .unwrap_or_default();
    let rr = setup
        .risk_reward_realized
        .map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}x"));

    format!(
        "{emoji} <b>{headline}</b> {emoji}\n{SEPARATOR}\n\
         {color} <b>{symbol}</b> - {direction} ({timeframe})\n{SEPARATOR}\n\n\
         💰 <b>Entry:</b> ${entry}\n\
         💸 <b>Exit:</b> {exit}\n\n\
         {pl_emoji} <b>P/L:</b> {pl_text}\n\
         📊 <b>R:R realized:</b> {rr}\n\
         ⏱️ <b>Duration:</b> {minutes} min\n\
         ⭐ <b>Score:</b> {score:.1}/100\n\n\
         📋 <b>Track record:</b> {wins}W / {losses}L / {expired} expired, win rate {win_rate:.1}%\n\n\
         🔗 Setup #{id}",
        symbol = escape(&setup.symbol),
        direction = setup.direction,
        timeframe = setup.timeframe,
        entry = setup.entry_price,
        exit = price(setup.exit_price),
        score = setup.score,
        wins = stats.wins,
        losses = stats.losses,
        expired = stats.expired,
        win_rate = stats.win_rate,
        id = setup.id,
    )
}

pub fn format_alert(title: &str, body: &str) -> String {
    format!("🔔 <b>{}</b>\n\n{}", escape(title), escape(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::sample_setup;

    fn closed_record() -> SetupRecord {
        SetupRecord {
            id: 7,
            setup_hash: "h".into(),
            scan_id: None,
            symbol: "AAPL".into(),
            asset_class: "stock".into(),
            timeframe: "4h".into(),
            direction: "LONG".into(),
            score: 72.5,
            confidence: 80.0,
            entry_price: 200.0,
            stop_loss: Some(195.0),
            target_1: Some(205.0),
            target_2: Some(210.0),
            risk_reward_t1: Some(1.0),
            current_price: 200.0,
            confluences_json: "[]".into(),
            warnings_json: "[]".into(),
            ai_provider: None,
            ai_validation_score: None,
            recommendation: None,
            status: "hit_tp1".into(),
            highest_price: Some(206.0),
            lowest_price: Some(199.0),
            exit_price: Some(205.0),
            profit_loss_pct: Some(2.5),
            risk_reward_realized: Some(1.0),
            notified: 0,
            created_at: 1_700_000_000,
            closed_at: Some(1_700_007_200),
            last_checked: Some(1_700_007_200),
        }
    }

    #[tokio::test]
    async fn test_format_opportunity() {
        let setup = sample_setup("ETH/USDT", AssetClass::Crypto).await;
        let text = format_opportunity(&setup);
        assert!(text.starts_with("🪙 CRYPTO"));
        assert!(text.contains("<b>ETH/USDT</b> (4h)"));
        assert!(text.contains("<b>Direction:</b> LONG"));
        assert!(text.contains("Target 1:"));
        assert!(!text.contains("AI Validation"));
    }

    #[tokio::test]
    async fn test_opportunity_escapes_derived_text() {
        let mut setup = sample_setup("ETH/USDT", AssetClass::Crypto).await;
        setup
            .confluences
            .insert(0, "SUPPORT_RESISTANCE: Near support at $29.00".into());
        setup.ai_insights = Some(crate::ai::AiValidation {
            valid: true,
            validation_score: Some(7.0),
            risk_factors: vec![],
            opportunities: vec![],
            recommendation: Some("Buy if RSI_14 < 30 & volume <confirms>".into()),
            caution: None,
        });

        let text = format_opportunity(&setup);
        assert!(text.contains("SUPPORT_RESISTANCE: Near support at $29.00"));
        assert!(text.contains("RSI_14 &lt; 30 &amp; volume &lt;confirms&gt;"));
        assert!(!text.contains("<confirms>"));
        assert_eq!(text.matches("<b>").count(), text.matches("</b>").count());
        assert_eq!(text.matches('<').count(), text.matches("<b>").count() * 2);
    }

    #[test]
    fn test_alert_escapes_title_and_body() {
        let text = format_alert("Scan <failed>", "provider_down & retry");
        assert_eq!(
            text,
            "🔔 <b>Scan &lt;failed&gt;</b>\n\nprovider_down &amp; retry"
        );
    }

    #[tokio::test]
    async fn test_scan_summary_counts_by_class() {
        let setups = vec![
            sample_setup("ETH/USDT", AssetClass::Crypto).await,
            sample_setup("AAPL", AssetClass::Stock).await,
            sample_setup("GLD", AssetClass::Commodity).await,
        ];
        let text = format_scan_summary(&setups, "quick", 48);
        assert!(text.contains("Preset: <b>QUICK</b>"));
        assert!(text.contains("Assets Scanned: <b>48</b>"));
        assert!(text.contains("🪙 Crypto: 1"));
        assert!(text.contains("🥇 Commodities: 1"));
        assert!(text.contains("💱 Forex: 0"));
        assert!(text.contains("3. GLD"));
    }

    #[test]
    fn test_format_trade_closed() {
        let stats = TrackingStats {
            wins: 3,
            losses: 1,
            win_rate: 75.0,
            ..Default::default()
        };
        let text = format_trade_closed(&closed_record(), &stats);
        assert!(text.contains("TARGET 1 HIT"));
        assert!(text.contains("<b>P/L:</b> +2.50%"));
        assert!(text.contains("<b>Duration:</b> 120 min"));
        assert!(text.contains("3W / 1L"));
        assert!(text.contains("Setup #7"));
    }

    #[test]
    fn test_unconfigured_notifier_is_disabled() {
        assert!(!TelegramNotifier::new(None, Some("1".into())).is_enabled());
        assert!(!TelegramNotifier::new(Some("t".into()), Some("abc".into())).is_enabled());
        assert!(TelegramNotifier::new(Some("t".into()), Some("-100123".into())).is_enabled());
    }
}
