//! Trade tracker: polls open setups and closes them on stop, target or age
//!
//! Each cycle loads every `open` setup, fetches a spot price through the
//! market data router, records the favourable extreme and closes the setup
//! when a level is crossed or it outlives its timeframe.

use crate::market_data::CandleSource;
use crate::system::SystemSwitch;
use crate::telegram::TelegramNotifier;
use crate::types::{AssetClass, Direction};
use anyhow::Result;
use chrono::Utc;
use persistence::repository::{SetupClose, SetupRecord, SetupRepository};
use persistence::SqlitePool;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SETUP_PAUSE: Duration = Duration::from_millis(100);
const MAX_RECENT: usize = 50;

// ---------------------------------------------------------------------------
// Outcome rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    HitSl,
    HitTp1,
    HitTp2,
    Expired,
}

impl CloseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseStatus::HitSl => "hit_sl",
            CloseStatus::HitTp1 => "hit_tp1",
            CloseStatus::HitTp2 => "hit_tp2",
            CloseStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub status: CloseStatus,
    pub exit_price: f64,
    pub profit_loss_pct: f64,
    /// Signed: negative when the exit is on the losing side
    pub risk_reward_realized: Option<f64>,
}

/// Hours a setup may stay open on its timeframe
pub fn max_age_hours(timeframe: &str) -> i64 {
    match timeframe {
        "15m" => 24,
        "1h" => 72,
        "4h" => 168,
        "1d" => 720,
        _ => 72,
    }
}

fn outcome(setup: &SetupRecord, direction: Direction, status: CloseStatus, price: f64) -> Outcome {
    let entry = setup.entry_price;
    let move_pct = if entry > 0.0 {
        (price - entry) / entry * 100.0
    } else {
        0.0
    };
    let (profit_loss_pct, gain) = match direction {
        Direction::Short => (-move_pct, entry - price),
        _ => (move_pct, price - entry),
    };
    let risk_reward_realized = setup
        .stop_loss
        .map(|stop| (entry - stop).abs())
        .filter(|risk| *risk > 0.0)
        .map(|risk| gain / risk);

    Outcome {
        status,
        exit_price: price,
        profit_loss_pct,
        risk_reward_realized,
    }
}

/// Decide whether an open setup resolves at `price` (checked at unix second `now`).
/// Stops are checked before targets, the far target before the near one.
pub fn evaluate_outcome(setup: &SetupRecord, price: f64, now: i64) -> Option<Outcome> {
    let direction = setup.direction.parse::<Direction>().unwrap_or(Direction::Neutral);
    let above = |level: Option<f64>| level.is_some_and(|l| price >= l);
    let below = |level: Option<f64>| level.is_some_and(|l| price <= l);

    let status = match direction {
        Direction::Long if below(setup.stop_loss) => Some(CloseStatus::HitSl),
        Direction::Long if above(setup.target_2) => Some(CloseStatus::HitTp2),
        Direction::Long if above(setup.target_1) => Some(CloseStatus::HitTp1),
        Direction::Short if above(setup.stop_loss) => Some(CloseStatus::HitSl),
        Direction::Short if below(setup.target_2) => Some(CloseStatus::HitTp2),
        Direction::Short if below(setup.target_1) => Some(CloseStatus::HitTp1),
        _ => None,
    };

    let status = status.or_else(|| {
        let age_secs = now - setup.created_at;
        (age_secs > max_age_hours(&setup.timeframe) * 3600).then_some(CloseStatus::Expired)
    })?;

    Some(outcome(setup, direction, status, price))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Idle,
    Tracking,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub setup_id: i64,
    pub symbol: String,
    pub direction: String,
    pub outcome: Outcome,
    pub closed_at: i64,
}

/// Shared state for the tracker loop
pub struct TrackerProgress {
    pub status: RwLock<TrackerStatus>,
    pub cancelled: AtomicBool,
    pub cycles: AtomicU32,
    pub open_count: AtomicU32,
    pub recent: RwLock<Vec<ClosedTrade>>,
    pub last_cycle_at: RwLock<Option<String>>,
    pub error_message: RwLock<Option<String>>,
}

impl TrackerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(TrackerStatus::Idle),
            cancelled: AtomicBool::new(false),
            cycles: AtomicU32::new(0),
            open_count: AtomicU32::new(0),
            recent: RwLock::new(Vec::new()),
            last_cycle_at: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.read().unwrap(),
            TrackerStatus::Tracking | TrackerStatus::Paused
        )
    }

    fn push_closed(&self, closed: ClosedTrade) {
        let mut recent = self.recent.write().unwrap();
        recent.insert(0, closed);
        recent.truncate(MAX_RECENT);
    }
}

impl Default for TrackerProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tracker loop
// ---------------------------------------------------------------------------

pub struct TrackerDeps {
    pub market: Arc<dyn CandleSource>,
    pub telegram: TelegramNotifier,
    pub switch: Arc<SystemSwitch>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub closed: usize,
    pub failed: usize,
}

/// One pass over all open setups
pub async fn check_open_setups(
    deps: &TrackerDeps,
    progress: &TrackerProgress,
    pool: &SqlitePool,
) -> Result<CycleReport> {
    let repo = SetupRepository::new(pool);
    let open = repo.open_setups().await?;
    progress.open_count.store(open.len() as u32, Ordering::Relaxed);

    let mut report = CycleReport::default();
    for (i, setup) in open.iter().enumerate() {
        if progress.cancelled.load(Ordering::Relaxed) {
            break;
        }
        if i > 0 {
            tokio::time::sleep(SETUP_PAUSE).await;
        }

        let Ok(class) = setup.asset_class.parse::<AssetClass>() else {
            warn!(id = setup.id, asset_class = %setup.asset_class, "Unknown asset class, skipping");
            report.failed += 1;
            continue;
        };
        let price = match deps.market.price(&setup.symbol, class).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %setup.symbol, error = %e, "Could not price setup");
                report.failed += 1;
                continue;
            }
        };

        let now = Utc::now().timestamp();
        repo.record_check(setup.id, price, now).await?;
        report.checked += 1;

        let Some(outcome) = evaluate_outcome(setup, price, now) else {
            debug!(symbol = %setup.symbol, price, "Setup still open");
            continue;
        };

        let closed = repo
            .close(
                setup.id,
                &SetupClose {
                    status: outcome.status.as_str(),
                    exit_price: outcome.exit_price,
                    profit_loss_pct: outcome.profit_loss_pct,
                    risk_reward_realized: outcome.risk_reward_realized,
                    closed_at: now,
                },
            )
            .await?;
        if !closed {
            continue;
        }

        report.closed += 1;
        info!(
            id = setup.id,
            symbol = %setup.symbol,
            direction = %setup.direction,
            status = outcome.status.as_str(),
            pnl_pct = outcome.profit_loss_pct,
            "Setup closed"
        );
        progress.push_closed(ClosedTrade {
            setup_id: setup.id,
            symbol: setup.symbol.clone(),
            direction: setup.direction.clone(),
            outcome,
            closed_at: now,
        });

        if deps.telegram.is_enabled() {
            if let (Some(record), Ok(stats)) = (repo.get(setup.id).await?, repo.stats().await) {
                if let Err(e) = deps.telegram.send_trade_closed(&record, &stats).await {
                    warn!(id = setup.id, error = %e, "Telegram close alert failed");
                }
            }
        }
    }

    progress.cycles.fetch_add(1, Ordering::Relaxed);
    *progress.last_cycle_at.write().unwrap() = Some(Utc::now().to_rfc3339());
    Ok(report)
}

/// Poll open setups every `interval` until cancelled. Cycles are skipped
/// while the system switch is off.
pub async fn run_trade_tracker(
    deps: &TrackerDeps,
    progress: &TrackerProgress,
    pool: SqlitePool,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "Trade tracker starting");
    progress.cancelled.store(false, Ordering::Relaxed);
    *progress.status.write().unwrap() = TrackerStatus::Tracking;

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            info!("Trade tracker cancelled");
            break;
        }

        if deps.switch.is_enabled() {
            *progress.status.write().unwrap() = TrackerStatus::Tracking;
            match check_open_setups(deps, progress, &pool).await {
                Ok(report) => {
                    *progress.error_message.write().unwrap() = None;
                    if report.checked > 0 {
                        info!(
                            checked = report.checked,
                            closed = report.closed,
                            failed = report.failed,
                            "Tracker cycle done"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "Tracker cycle failed");
                    *progress.error_message.write().unwrap() = Some(e.to_string());
                }
            }
        } else {
            debug!("System disabled, skipping tracker cycle");
            *progress.status.write().unwrap() = TrackerStatus::Paused;
        }

        // Sleep in short slices so cancellation is prompt
        let slices = (interval.as_millis() / 500).max(1);
        for _ in 0..slices {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    *progress.status.write().unwrap() = TrackerStatus::Idle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::FakeMarket;
    use persistence::repository::NewSetup;
    use persistence::Database;

    fn record(direction: &str, timeframe: &str) -> SetupRecord {
        SetupRecord {
            id: 1,
            setup_hash: "h".into(),
            scan_id: None,
            symbol: "BTC/USDT".into(),
            asset_class: "crypto".into(),
            timeframe: timeframe.into(),
            direction: direction.into(),
            score: 70.0,
            confidence: 70.0,
            entry_price: 100.0,
            stop_loss: Some(if direction == "LONG" { 95.0 } else { 105.0 }),
            target_1: Some(if direction == "LONG" { 110.0 } else { 90.0 }),
            target_2: Some(if direction == "LONG" { 120.0 } else { 80.0 }),
            risk_reward_t1: Some(2.0),
            current_price: 100.0,
            confluences_json: "[]".into(),
            warnings_json: "[]".into(),
            ai_provider: None,
            ai_validation_score: None,
            recommendation: None,
            status: "open".into(),
            highest_price: None,
            lowest_price: None,
            exit_price: None,
            profit_loss_pct: None,
            risk_reward_realized: None,
            notified: 0,
            created_at: 1_000_000,
            closed_at: None,
            last_checked: None,
        }
    }

    #[test]
    fn test_long_outcomes() {
        let setup = record("LONG", "4h");
        let now = setup.created_at + 3600;

        assert!(evaluate_outcome(&setup, 101.0, now).is_none());

        let sl = evaluate_outcome(&setup, 94.0, now).unwrap();
        assert_eq!(sl.status, CloseStatus::HitSl);
        assert!((sl.profit_loss_pct + 6.0).abs() < 1e-9);
        assert!((sl.risk_reward_realized.unwrap() + 1.2).abs() < 1e-9);

        let tp1 = evaluate_outcome(&setup, 112.0, now).unwrap();
        assert_eq!(tp1.status, CloseStatus::HitTp1);

        let tp2 = evaluate_outcome(&setup, 125.0, now).unwrap();
        assert_eq!(tp2.status, CloseStatus::HitTp2);
        assert!((tp2.profit_loss_pct - 25.0).abs() < 1e-9);
        assert!((tp2.risk_reward_realized.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_outcomes_are_mirrored() {
        let setup = record("SHORT", "1h");
        let now = setup.created_at + 60;

        assert_eq!(
            evaluate_outcome(&setup, 106.0, now).unwrap().status,
            CloseStatus::HitSl
        );
        let tp1 = evaluate_outcome(&setup, 90.0, now).unwrap();
        assert_eq!(tp1.status, CloseStatus::HitTp1);
        assert!((tp1.profit_loss_pct - 10.0).abs() < 1e-9);
        assert_eq!(
            evaluate_outcome(&setup, 79.0, now).unwrap().status,
            CloseStatus::HitTp2
        );
    }

    #[test]
    fn test_expiry_by_timeframe() {
        let setup = record("LONG", "1h");
        let limit = setup.created_at + 72 * 3600;
        assert!(evaluate_outcome(&setup, 101.0, limit).is_none());

        let expired = evaluate_outcome(&setup, 101.0, limit + 1).unwrap();
        assert_eq!(expired.status, CloseStatus::Expired);
        assert!((expired.profit_loss_pct - 1.0).abs() < 1e-9);

        assert_eq!(max_age_hours("1d"), 720);
        assert_eq!(max_age_hours("30m"), 72);
    }

    fn state_file(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "trade-scout-tracker-{}-{}.txt",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_cycle_closes_hit_setups() {
        let db = Database::in_memory().await.unwrap();
        let repo = SetupRepository::new(db.pool());
        let base = NewSetup {
            asset_class: "crypto".into(),
            timeframe: "4h".into(),
            direction: "LONG".into(),
            entry_price: 100.0,
            stop_loss: Some(95.0),
            target_1: Some(110.0),
            target_2: Some(120.0),
            current_price: 100.0,
            ..Default::default()
        };
        let winner = repo
            .save(&NewSetup {
                setup_hash: "a".into(),
                symbol: "ETH/USDT".into(),
                ..base.clone()
            })
            .await
            .unwrap()
            .unwrap();
        let waiting = repo
            .save(&NewSetup {
                setup_hash: "b".into(),
                symbol: "SOL/USDT".into(),
                ..base.clone()
            })
            .await
            .unwrap()
            .unwrap();
        repo.save(&NewSetup {
            setup_hash: "c".into(),
            symbol: "NOPRICE".into(),
            ..base
        })
        .await
        .unwrap();

        let market = Arc::new(FakeMarket::new());
        market.set_price("ETH/USDT", 111.0);
        market.set_price("SOL/USDT", 103.0);

        let path = state_file("cycle");
        let deps = TrackerDeps {
            market,
            telegram: TelegramNotifier::disabled(),
            switch: Arc::new(SystemSwitch::load(&path)),
        };
        let progress = TrackerProgress::new();

        let report = check_open_setups(&deps, &progress, db.pool()).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.closed, 1);
        assert_eq!(report.failed, 1);

        let closed = repo.get(winner).await.unwrap().unwrap();
        assert_eq!(closed.status, "hit_tp1");
        assert_eq!(closed.exit_price, Some(111.0));
        assert_eq!(closed.highest_price, Some(111.0));

        let open = repo.get(waiting).await.unwrap().unwrap();
        assert_eq!(open.status, "open");
        assert_eq!(open.highest_price, Some(103.0));
        assert!(open.last_checked.is_some());

        assert_eq!(progress.recent.read().unwrap().len(), 1);
        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.open_setups, 2);
        std::fs::remove_file(&path).ok();
    }
}
