//! Scan session repository: one row per manual or scheduled market scan

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted scan session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanRecord {
    pub id: i64,
    pub scan_type: String,
    pub preset: Option<String>,
    /// JSON array of timeframe strings
    pub timeframes: String,
    pub ai_provider: Option<String>,
    pub setups_found: i64,
    pub high_confidence_count: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub error_message: Option<String>,
}

/// Fields supplied when a scan starts
#[derive(Debug, Clone)]
pub struct NewScan<'s> {
    pub scan_type: &'s str,
    pub preset: Option<&'s str>,
    pub timeframes: &'s [String],
    pub ai_provider: Option<&'s str>,
}

/// Repository for scan sessions
pub struct ScanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ScanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a new session in `running` state and return its id
    pub async fn create(&self, scan: &NewScan<'_>) -> DbResult<i64> {
        let timeframes = serde_json::to_string(scan.timeframes)
            .map_err(|e| DbError::Query(format!("timeframes encode: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO scan_results (scan_type, preset, timeframes, ai_provider, status)
               VALUES (?1, ?2, ?3, ?4, 'running')"#,
        )
        .bind(scan.scan_type)
        .bind(scan.preset)
        .bind(&timeframes)
        .bind(scan.ai_provider)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a session completed; duration is derived from `started_at`
    pub async fn complete(
        &self,
        scan_id: i64,
        setups_found: i64,
        high_confidence_count: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"UPDATE scan_results SET
                 status = 'completed',
                 setups_found = ?2,
                 high_confidence_count = ?3,
                 completed_at = strftime('%s', 'now'),
                 duration_seconds = CAST(strftime('%s', 'now') AS REAL) - started_at
               WHERE id = ?1"#,
        )
        .bind(scan_id)
        .bind(setups_found)
        .bind(high_confidence_count)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("scan #{scan_id}")));
        }
        Ok(())
    }

    /// Mark a session failed with an error message
    pub async fn fail(&self, scan_id: i64, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE scan_results SET
                 status = 'error',
                 error_message = ?2,
                 completed_at = strftime('%s', 'now'),
                 duration_seconds = CAST(strftime('%s', 'now') AS REAL) - started_at
               WHERE id = ?1"#,
        )
        .bind(scan_id)
        .bind(error)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, scan_id: i64) -> DbResult<Option<ScanRecord>> {
        let record = sqlx::query_as::<_, ScanRecord>("SELECT * FROM scan_results WHERE id = ?1")
            .bind(scan_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent sessions first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<ScanRecord>> {
        let records = sqlx::query_as::<_, ScanRecord>(
            "SELECT * FROM scan_results ORDER BY started_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scan_results")
            .fetch_one(self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_create_and_complete_scan() {
        let db = Database::in_memory().await.unwrap();
        let repo = ScanRepository::new(db.pool());

        let timeframes = vec!["4h".to_string()];
        let id = repo
            .create(&NewScan {
                scan_type: "auto_4h",
                preset: Some("crypto"),
                timeframes: &timeframes,
                ai_provider: Some("claude"),
            })
            .await
            .unwrap();

        let running = repo.get(id).await.unwrap().unwrap();
        assert_eq!(running.status, "running");
        assert_eq!(running.timeframes, r#"["4h"]"#);

        repo.complete(id, 7, 3).await.unwrap();
        let done = repo.get(id).await.unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.setups_found, 7);
        assert_eq!(done.high_confidence_count, 3);
        assert!(done.completed_at.is_some());
        assert!(done.duration_seconds.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_complete_unknown_scan_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        let repo = ScanRepository::new(db.pool());
        let err = repo.complete(42, 0, 0).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fail_and_recent_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = ScanRepository::new(db.pool());
        let tfs = vec!["1h".to_string()];
        let new = NewScan {
            scan_type: "manual",
            preset: None,
            timeframes: &tfs,
            ai_provider: None,
        };
        let first = repo.create(&new).await.unwrap();
        let second = repo.create(&new).await.unwrap();
        repo.fail(first, "provider down").await.unwrap();

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[1].status, "error");
        assert_eq!(recent[1].error_message.as_deref(), Some("provider down"));
        assert_eq!(repo.count().await.unwrap(), 2);
    }
}
