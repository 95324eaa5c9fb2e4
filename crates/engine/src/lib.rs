//! Trade Scout engine: market scanning, setup scoring and outcome tracking
//!
//! Provides:
//! - Market data clients (Binance, CoinGecko, Finnhub, OANDA, Yahoo) behind a
//!   fallback router with rate limits and a short candle cache
//! - Technical indicators and a weighted multi-factor setup score
//! - Entry / stop / target placement and optional LLM validation
//! - Scanner, trade tracker and cron-style scheduler
//! - Telegram notifications and a persisted kill switch

pub mod ai;
pub mod analysis;
pub mod api;
pub mod indicators;
pub mod levels;
pub mod market_data;
pub mod scanner;
pub mod scheduler;
pub mod scoring;
pub mod system;
pub mod telegram;
pub mod tracker;
pub mod types;
pub mod universe;

// Re-exports for convenience
pub use ai::{build_client, AiAnalyzer, AiProvider, ChatClient};
pub use analysis::{SetupAnalyzer, TradeSetup};
pub use market_data::{CandleSource, MarketDataConfig, MarketDataService};
pub use scanner::{run_claimed_scan, run_scan, ScanDeps, ScanOutcome, ScanProgress, ScanRequest, ScanStatus};
pub use scheduler::{default_jobs, run_scheduler, CronSchedule, ScheduledJob};
pub use system::SystemSwitch;
pub use telegram::TelegramNotifier;
pub use tracker::{
    check_open_setups, evaluate_outcome, run_trade_tracker, TrackerDeps, TrackerProgress,
    TrackerStatus,
};
pub use types::*;
pub use universe::{preset_assets, Asset};
