//! Usage state persistence
//!
//! A small key-value boundary ([`KeyValueStore`]) with a SQLite and an
//! in-memory implementation, and [`KvUsageStateStore`] mapping
//! [`UsageState`] onto it. Both date keys are always written from the single
//! `last_synced_date`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use super::types::{ThresholdFlags, UsageState, DEFAULT_TOTAL_LIMIT_MB};
use crate::error::{Error, Result};
use crate::utils::{format_date, parse_date};

// ============================================================================
// Keys
// ============================================================================

pub const KEY_TOTAL_LIMIT: &str = "saved_total_limit";
pub const KEY_USED_MB: &str = "saved_used_mb";
pub const KEY_SERVICE_DATE: &str = "last_service_date";
pub const KEY_FLAG_RESET_DATE: &str = "last_flag_reset_date";
pub const KEY_WARNING_80: &str = "warning_80_shown";
pub const KEY_DISCONNECTED_95: &str = "disconnected_95";
pub const KEY_DISCONNECTED_100: &str = "disconnected_100";

// ============================================================================
// KeyValueStore
// ============================================================================

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write all pairs; implementations make this atomic where they can
    async fn set_many(&self, pairs: &[(&str, String)]) -> Result<()>;

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.set_many(&[(key, value)]).await
    }
}

/// SQLite-backed store over the `kv_settings` table
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn set_many(&self, pairs: &[(&str, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in pairs {
            sqlx::query(
                r#"
                INSERT INTO kv_settings (key, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(*key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::internal("kv store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    async fn set_many(&self, pairs: &[(&str, String)]) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::internal("kv store lock poisoned"))?;
        for (key, value) in pairs {
            values.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

// ============================================================================
// UsageStateStore
// ============================================================================

/// The one persistence boundary for [`UsageState`]
#[async_trait]
pub trait UsageStateStore: Send + Sync {
    /// Load persisted state; missing or unreadable keys fall back to a fresh
    /// state for `today`. No rollover is applied here.
    async fn load(&self, today: NaiveDate, is_official_server: bool) -> Result<UsageState>;

    async fn save(&self, state: &UsageState) -> Result<()>;
}

/// [`UsageStateStore`] on top of any [`KeyValueStore`]
#[derive(Clone)]
pub struct KvUsageStateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl KvUsageStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.kv.get(key).await?.and_then(|v| v.trim().parse().ok()))
    }

    async fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.kv.get(key).await?.as_deref(), Some("true") | Some("1")))
    }
}

#[async_trait]
impl UsageStateStore for KvUsageStateStore {
    async fn load(&self, today: NaiveDate, is_official_server: bool) -> Result<UsageState> {
        let date = match self.kv.get(KEY_SERVICE_DATE).await? {
            Some(v) => parse_date(&v),
            None => None,
        };
        let date = match date {
            Some(d) => Some(d),
            None => self
                .kv
                .get(KEY_FLAG_RESET_DATE)
                .await?
                .and_then(|v| parse_date(&v)),
        };

        let Some(last_synced_date) = date else {
            log::debug!("[usage:store] No persisted state, starting fresh for {}", today);
            let mut state = UsageState::new(today, is_official_server);
            if let Some(limit) = self.get_u64(KEY_TOTAL_LIMIT).await? {
                state.total_limit_mb = limit;
            }
            return Ok(state);
        };

        let state = UsageState {
            total_limit_mb: self
                .get_u64(KEY_TOTAL_LIMIT)
                .await?
                .unwrap_or(DEFAULT_TOTAL_LIMIT_MB),
            used_mb: self.get_u64(KEY_USED_MB).await?.unwrap_or(0),
            accumulated_unsynced_bytes: 0,
            last_synced_date,
            flags: ThresholdFlags {
                warning_80_shown: self.get_bool(KEY_WARNING_80).await?,
                disconnected_95: self.get_bool(KEY_DISCONNECTED_95).await?,
                disconnected_100: self.get_bool(KEY_DISCONNECTED_100).await?,
            },
            is_official_server,
        };

        log::debug!(
            "[usage:store] Loaded state: {} / {} MB for {}",
            state.used_mb,
            state.total_limit_mb,
            state.last_synced_date
        );
        Ok(state)
    }

    async fn save(&self, state: &UsageState) -> Result<()> {
        let date = format_date(state.last_synced_date);
        let pairs = [
            (KEY_TOTAL_LIMIT, state.total_limit_mb.to_string()),
            (KEY_USED_MB, state.used_mb.to_string()),
            (KEY_SERVICE_DATE, date.clone()),
            (KEY_FLAG_RESET_DATE, date),
            (KEY_WARNING_80, state.flags.warning_80_shown.to_string()),
            (KEY_DISCONNECTED_95, state.flags.disconnected_95.to_string()),
            (KEY_DISCONNECTED_100, state.flags.disconnected_100.to_string()),
        ];
        self.kv.set_many(&pairs).await?;
        log::debug!(
            "[usage:store] Saved state: {} / {} MB for {}",
            state.used_mb,
            state.total_limit_mb,
            state.last_synced_date
        );
        Ok(())
    }
}
