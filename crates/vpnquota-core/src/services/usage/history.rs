//! Sync history
//!
//! Append-only log of accounting round trips in the `sync_history` table.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::client::UsageClientError;
use super::types::{ServerUsage, SyncRequest};
use crate::error::Result;

/// One stored round trip
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SyncRecord {
    pub id: String,
    pub device_id: String,
    pub action_type: String,
    pub add_mb: i64,
    pub exchange_mb: i64,
    pub cost: i64,
    pub success: bool,
    pub used_mb: Option<i64>,
    pub total_limit_mb: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl SyncRecord {
    /// Build a record from a request and its outcome
    pub fn from_outcome(
        request: &SyncRequest,
        outcome: std::result::Result<&ServerUsage, &UsageClientError>,
    ) -> Self {
        let (success, used_mb, total_limit_mb, error_message) = match outcome {
            Ok(usage) => (
                true,
                Some(to_i64(usage.display_used_mb)),
                Some(to_i64(usage.total_limit_mb)),
                None,
            ),
            Err(e) => (false, None, None, Some(e.to_string())),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: request.device_id.clone(),
            action_type: request.action_type.to_string(),
            add_mb: to_i64(request.add_mb),
            exchange_mb: to_i64(request.exchange_mb),
            cost: to_i64(request.cost),
            success,
            used_mb,
            total_limit_mb,
            error_message,
            created_at: String::new(),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// SyncHistoryStore
// ============================================================================

#[derive(Clone)]
pub struct SyncHistoryStore {
    pool: SqlitePool,
}

impl SyncHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a record; `created_at` is set by the database
    pub async fn save(&self, record: &SyncRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history
            (id, device_id, action_type, add_mb, exchange_mb, cost, success,
             used_mb, total_limit_mb, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
            "#,
        )
        .bind(&record.id)
        .bind(&record.device_id)
        .bind(&record.action_type)
        .bind(record.add_mb)
        .bind(record.exchange_mb)
        .bind(record.cost)
        .bind(record.success)
        .bind(record.used_mb)
        .bind(record.total_limit_mb)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        log::debug!(
            "[usage:history] Recorded {} (success={})",
            record.action_type,
            record.success
        );
        Ok(())
    }

    /// Most recent records first
    pub async fn recent(&self, limit: u32) -> Result<Vec<SyncRecord>> {
        let rows = sqlx::query_as::<_, SyncRecord>(
            r#"
            SELECT id, device_id, action_type, add_mb, exchange_mb, cost, success,
                   used_mb, total_limit_mb, error_message, created_at
            FROM sync_history
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete records older than `days`; returns the number deleted
    pub async fn cleanup(&self, days: u32) -> Result<u64> {
        log::info!("[usage:history] Cleaning up records older than {} days", days);

        let result = sqlx::query(
            r#"
            DELETE FROM sync_history
            WHERE created_at < datetime('now', '-' || ? || ' days')
            "#,
        )
        .bind(days as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::usage::types::ActionType;
    use chrono::NaiveDate;

    fn request(add_mb: u64) -> SyncRequest {
        SyncRequest::usage("dev-1", add_mb, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap())
    }

    fn usage() -> ServerUsage {
        ServerUsage::from_json(
            r#"{"display_used_mb": 77, "total_limit_mb": 3072}"#,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_record_from_success() {
        let record = SyncRecord::from_outcome(&request(5), Ok(&usage()));
        assert!(record.success);
        assert_eq!(record.add_mb, 5);
        assert_eq!(record.used_mb, Some(77));
        assert_eq!(record.action_type, "sync");
    }

    #[test]
    fn test_record_from_failure() {
        let err = UsageClientError::ConnectFailed;
        let record = SyncRecord::from_outcome(&request(5), Err(&err));
        assert!(!record.success);
        assert_eq!(record.used_mb, None);
        assert_eq!(record.error_message.as_deref(), Some("Connection failed"));
    }

    #[tokio::test]
    async fn test_save_and_recent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SyncHistoryStore::new(db.pool.clone());

        store
            .save(&SyncRecord::from_outcome(&request(1), Ok(&usage())))
            .await
            .unwrap();
        let exchange = SyncRequest::action(
            "dev-1",
            ActionType::Exchange,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        )
        .with_exchange(450, 60);
        store
            .save(&SyncRecord::from_outcome(&exchange, Ok(&usage())))
            .await
            .unwrap();

        let records = store.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action_type, "exchange");
        assert_eq!(records[0].cost, 60);
        assert!(!records[0].created_at.is_empty());

        assert_eq!(store.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SyncHistoryStore::new(db.pool.clone());
        store
            .save(&SyncRecord::from_outcome(&request(1), Ok(&usage())))
            .await
            .unwrap();
        assert_eq!(store.cleanup(30).await.unwrap(), 0);
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
    }
}
