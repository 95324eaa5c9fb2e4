//! Trade setup repository: persistence for scored setups and their outcomes
//!
//! A setup is inserted as `open` and later closed by the tracker with one of
//! `hit_tp1`, `hit_tp2`, `hit_sl` or `expired`.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

pub const STATUS_OPEN: &str = "open";

/// A persisted trade setup
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SetupRecord {
    pub id: i64,
    pub setup_hash: String,
    pub scan_id: Option<i64>,
    pub symbol: String,
    pub asset_class: String,
    pub timeframe: String,
    pub direction: String,
    pub score: f64,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub target_1: Option<f64>,
    pub target_2: Option<f64>,
    pub risk_reward_t1: Option<f64>,
    pub current_price: f64,
    pub confluences_json: String,
    pub warnings_json: String,
    pub ai_provider: Option<String>,
    pub ai_validation_score: Option<f64>,
    pub recommendation: Option<String>,
    pub status: String,
    pub highest_price: Option<f64>,
    pub lowest_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub profit_loss_pct: Option<f64>,
    pub risk_reward_realized: Option<f64>,
    pub notified: i64,
    pub created_at: i64,
    pub closed_at: Option<i64>,
    pub last_checked: Option<i64>,
}

/// Insert payload for a new setup
#[derive(Debug, Clone, Default)]
pub struct NewSetup {
    pub setup_hash: String,
    pub scan_id: Option<i64>,
    pub symbol: String,
    pub asset_class: String,
    pub timeframe: String,
    pub direction: String,
    pub score: f64,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub target_1: Option<f64>,
    pub target_2: Option<f64>,
    pub risk_reward_t1: Option<f64>,
    pub current_price: f64,
    pub confluences: Vec<String>,
    pub warnings: Vec<String>,
    pub ai_provider: Option<String>,
    pub ai_validation_score: Option<f64>,
    pub recommendation: Option<String>,
}

/// Closing data written by the tracker
#[derive(Debug, Clone)]
pub struct SetupClose<'s> {
    pub status: &'s str,
    pub exit_price: f64,
    pub profit_loss_pct: f64,
    pub risk_reward_realized: Option<f64>,
    pub closed_at: i64,
}

/// Aggregated outcome statistics over all tracked setups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingStats {
    pub total_setups: i64,
    pub open_setups: i64,
    pub closed_setups: i64,
    pub wins: i64,
    pub losses: i64,
    pub expired: i64,
    /// Wins over (wins + losses), percent
    pub win_rate: f64,
    pub avg_profit_pct: f64,
    pub avg_loss_pct: f64,
    pub total_scans: i64,
}

/// Repository for trade setups
pub struct SetupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SetupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a setup (INSERT OR IGNORE: skips if setup_hash already exists).
    /// Returns the new row id, or `None` when the setup was already tracked.
    pub async fn save(&self, setup: &NewSetup) -> DbResult<Option<i64>> {
        let confluences = serde_json::to_string(&setup.confluences).unwrap_or_else(|_| "[]".into());
        let warnings = serde_json::to_string(&setup.warnings).unwrap_or_else(|_| "[]".into());
        let is_long = setup.direction == "LONG";

        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO trade_setups (
                setup_hash, scan_id, symbol, asset_class, timeframe, direction,
                score, confidence, entry_price, stop_loss, target_1, target_2,
                risk_reward_t1, current_price, confluences_json, warnings_json,
                ai_provider, ai_validation_score, recommendation, status,
                highest_price, lowest_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, 'open', ?20, ?21)"#,
        )
        .bind(&setup.setup_hash)
        .bind(setup.scan_id)
        .bind(&setup.symbol)
        .bind(&setup.asset_class)
        .bind(&setup.timeframe)
        .bind(&setup.direction)
        .bind(setup.score)
        .bind(setup.confidence)
        .bind(setup.entry_price)
        .bind(setup.stop_loss)
        .bind(setup.target_1)
        .bind(setup.target_2)
        .bind(setup.risk_reward_t1)
        .bind(setup.current_price)
        .bind(&confluences)
        .bind(&warnings)
        .bind(&setup.ai_provider)
        .bind(setup.ai_validation_score)
        .bind(&setup.recommendation)
        .bind(is_long.then_some(setup.entry_price))
        .bind((!is_long).then_some(setup.entry_price))
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<SetupRecord>> {
        let record = sqlx::query_as::<_, SetupRecord>("SELECT * FROM trade_setups WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// All setups still waiting for a target, stop or expiry
    pub async fn open_setups(&self) -> DbResult<Vec<SetupRecord>> {
        let records = sqlx::query_as::<_, SetupRecord>(
            "SELECT * FROM trade_setups WHERE status = 'open' ORDER BY created_at ASC",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Setups produced by one scan, best score first
    pub async fn by_scan(&self, scan_id: i64) -> DbResult<Vec<SetupRecord>> {
        let records = sqlx::query_as::<_, SetupRecord>(
            "SELECT * FROM trade_setups WHERE scan_id = ?1 ORDER BY score DESC, confidence DESC",
        )
        .bind(scan_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Recent setups, optionally filtered by status
    pub async fn recent(&self, status: Option<&str>, limit: i64) -> DbResult<Vec<SetupRecord>> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, SetupRecord>(
                    r#"SELECT * FROM trade_setups WHERE status = ?1
                       ORDER BY created_at DESC, id DESC LIMIT ?2"#,
                )
                .bind(status)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SetupRecord>(
                    "SELECT * FROM trade_setups ORDER BY created_at DESC, id DESC LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };
        Ok(records)
    }

    /// Record a price check: extends the favourable extreme and stamps `last_checked`
    pub async fn record_check(&self, id: i64, price: f64, checked_at: i64) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE trade_setups SET
                 highest_price = CASE WHEN direction = 'LONG'
                     THEN MAX(COALESCE(highest_price, ?2), ?2) ELSE highest_price END,
                 lowest_price = CASE WHEN direction = 'SHORT'
                     THEN MIN(COALESCE(lowest_price, ?2), ?2) ELSE lowest_price END,
                 last_checked = ?3
               WHERE id = ?1"#,
        )
        .bind(id)
        .bind(price)
        .bind(checked_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Close an open setup. Returns false if it was already closed.
    pub async fn close(&self, id: i64, close: &SetupClose<'_>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE trade_setups SET
                 status = ?2,
                 exit_price = ?3,
                 profit_loss_pct = ?4,
                 risk_reward_realized = ?5,
                 closed_at = ?6
               WHERE id = ?1 AND status = 'open'"#,
        )
        .bind(id)
        .bind(close.status)
        .bind(close.exit_price)
        .bind(close.profit_loss_pct)
        .bind(close.risk_reward_realized)
        .bind(close.closed_at)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_notified(&self, id: i64) -> DbResult<()> {
        sqlx::query("UPDATE trade_setups SET notified = 1 WHERE id = ?1")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Outcome statistics across all setups
    pub async fn stats(&self) -> DbResult<TrackingStats> {
        let row: (i64, i64, i64, i64, i64, Option<f64>, Option<f64>) = sqlx::query_as(
            r#"SELECT
                 COUNT(*),
                 COALESCE(SUM(CASE WHEN status = 'open' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN status IN ('hit_tp1', 'hit_tp2') THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN status = 'hit_sl' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN status = 'expired' THEN 1 ELSE 0 END), 0),
                 AVG(CASE WHEN status IN ('hit_tp1', 'hit_tp2') THEN profit_loss_pct END),
                 AVG(CASE WHEN status = 'hit_sl' THEN ABS(profit_loss_pct) END)
               FROM trade_setups"#,
        )
        .fetch_one(self.pool)
        .await?;

        let (total, open, wins, losses, expired, avg_profit, avg_loss) = row;
        let (scans,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scan_results")
            .fetch_one(self.pool)
            .await?;

        let resolved = wins + losses;
        let win_rate = if resolved > 0 {
            wins as f64 / resolved as f64 * 100.0
        } else {
            0.0
        };

        Ok(TrackingStats {
            total_setups: total,
            open_setups: open,
            closed_setups: total - open,
            wins,
            losses,
            expired,
            win_rate: (win_rate * 100.0).round() / 100.0,
            avg_profit_pct: avg_profit.unwrap_or(0.0),
            avg_loss_pct: avg_loss.unwrap_or(0.0),
            total_scans: scans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn new_setup(hash: &str, direction: &str) -> NewSetup {
        NewSetup {
            setup_hash: hash.to_string(),
            symbol: "BTC/USDT".to_string(),
            asset_class: "crypto".to_string(),
            timeframe: "4h".to_string(),
            direction: direction.to_string(),
            score: 72.5,
            confidence: 80.0,
            entry_price: 100.0,
            stop_loss: Some(95.0),
            target_1: Some(110.0),
            target_2: Some(120.0),
            risk_reward_t1: Some(2.0),
            current_price: 100.0,
            confluences: vec!["RSI: oversold".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_deduplicates_by_hash() {
        let db = Database::in_memory().await.unwrap();
        let repo = SetupRepository::new(db.pool());

        let first = repo.save(&new_setup("abc", "LONG")).await.unwrap();
        assert!(first.is_some());
        let again = repo.save(&new_setup("abc", "LONG")).await.unwrap();
        assert!(again.is_none());

        let open = repo.open_setups().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].confluences_json, r#"["RSI: oversold"]"#);
        assert_eq!(open[0].highest_price, Some(100.0));
        assert_eq!(open[0].lowest_price, None);
    }

    #[tokio::test]
    async fn test_record_check_tracks_extremes() {
        let db = Database::in_memory().await.unwrap();
        let repo = SetupRepository::new(db.pool());
        let long_id = repo.save(&new_setup("l", "LONG")).await.unwrap().unwrap();
        let short_id = repo.save(&new_setup("s", "SHORT")).await.unwrap().unwrap();

        repo.record_check(long_id, 104.0, 1_700_000_000).await.unwrap();
        repo.record_check(long_id, 102.0, 1_700_000_060).await.unwrap();
        repo.record_check(short_id, 97.0, 1_700_000_000).await.unwrap();
        repo.record_check(short_id, 99.0, 1_700_000_060).await.unwrap();

        let long = repo.get(long_id).await.unwrap().unwrap();
        assert_eq!(long.highest_price, Some(104.0));
        assert_eq!(long.last_checked, Some(1_700_000_060));
        let short = repo.get(short_id).await.unwrap().unwrap();
        assert_eq!(short.lowest_price, Some(97.0));
    }

    #[tokio::test]
    async fn test_close_once_and_stats() {
        let db = Database::in_memory().await.unwrap();
        let repo = SetupRepository::new(db.pool());
        let win = repo.save(&new_setup("w", "LONG")).await.unwrap().unwrap();
        let loss = repo.save(&new_setup("x", "LONG")).await.unwrap().unwrap();
        repo.save(&new_setup("o", "SHORT")).await.unwrap();

        let closed = repo
            .close(
                win,
                &SetupClose {
                    status: "hit_tp1",
                    exit_price: 110.0,
                    profit_loss_pct: 10.0,
                    risk_reward_realized: Some(2.0),
                    closed_at: 1_700_000_000,
                },
            )
            .await
            .unwrap();
        assert!(closed);

        let loss_close = SetupClose {
            status: "hit_sl",
            exit_price: 95.0,
            profit_loss_pct: -5.0,
            risk_reward_realized: Some(1.0),
            closed_at: 1_700_000_000,
        };
        assert!(repo.close(loss, &loss_close).await.unwrap());
        assert!(!repo.close(loss, &loss_close).await.unwrap());

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_setups, 3);
        assert_eq!(stats.open_setups, 1);
        assert_eq!(stats.closed_setups, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.win_rate, 50.0);
        assert_eq!(stats.avg_profit_pct, 10.0);
        assert_eq!(stats.avg_loss_pct, 5.0);

        assert_eq!(repo.recent(Some("hit_sl"), 10).await.unwrap().len(), 1);
        assert_eq!(repo.recent(None, 10).await.unwrap().len(), 3);
    }
}
