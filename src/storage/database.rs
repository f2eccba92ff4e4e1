use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StorageError;
use super::schema::init_database;
use super::{
    QUOTA_DB_FILENAME, SETTING_CRITICAL_PCT, SETTING_LAST_RESET_MONTH, SETTING_WARNING_PCT,
};

/// One durable quota row per account. `monthly_limit_bytes == 0` means the
/// account is untracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub account_id: String,
    pub monthly_limit_bytes: i64,
    pub current_usage_bytes: i64,
    pub last_reset: DateTime<Utc>,
    pub warning_sent: bool,
    pub critical_sent: bool,
}

impl QuotaRecord {
    pub fn untracked(account_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            monthly_limit_bytes: 0,
            current_usage_bytes: 0,
            last_reset: now,
            warning_sent: false,
            critical_sent: false,
        }
    }

    pub fn percent_used(&self) -> f64 {
        if self.monthly_limit_bytes <= 0 {
            return 0.0;
        }
        (self.current_usage_bytes as f64 / self.monthly_limit_bytes as f64) * 100.0
    }
}

/// Usage state returned by the atomic increment, read in the same statement.
#[derive(Debug, Clone, Copy)]
pub struct UsageSnapshot {
    pub usage_bytes: i64,
    pub limit_bytes: i64,
    pub warning_sent: bool,
    pub critical_sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCounter {
    pub account_id: String,
    pub download_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    Warning,
    Critical,
}

impl Latch {
    fn column(self) -> &'static str {
        match self {
            Latch::Warning => "warning_sent",
            Latch::Critical => "critical_sent",
        }
    }
}

pub struct QuotaDatabase {
    conn: Mutex<Connection>,
}

impl QuotaDatabase {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(QUOTA_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::InvalidValue("connection poisoned".into()))
    }

    pub fn get_record(&self, account_id: &str) -> Result<Option<QuotaRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, monthly_limit_bytes, current_usage_bytes, last_reset,
                   warning_sent, critical_sent
            FROM transfer_quotas
            WHERE account_id = ?1
            "#,
        )?;

        let record = stmt
            .query_row(params![account_id], row_to_record)
            .optional()?;
        Ok(record)
    }

    pub fn list_records(&self) -> Result<Vec<QuotaRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, monthly_limit_bytes, current_usage_bytes, last_reset,
                   warning_sent, critical_sent
            FROM transfer_quotas
            ORDER BY account_id
            "#,
        )?;

        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Upserts the limit for an account. A changed limit clears both latches
    /// so the new ceiling gets a fresh evaluation; an unchanged limit leaves
    /// them alone.
    pub fn set_limit(
        &self,
        account_id: &str,
        limit_bytes: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if limit_bytes < 0 {
            return Err(StorageError::InvalidValue(
                "limit must not be negative".into(),
            ));
        }

        let conn = self.lock()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT monthly_limit_bytes FROM transfer_quotas WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(current) if current == limit_bytes => {}
            Some(_) => {
                conn.execute(
                    r#"
                    UPDATE transfer_quotas
                    SET monthly_limit_bytes = ?2, warning_sent = 0, critical_sent = 0
                    WHERE account_id = ?1
                    "#,
                    params![account_id, limit_bytes],
                )?;
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO transfer_quotas
                        (account_id, monthly_limit_bytes, current_usage_bytes, last_reset,
                         warning_sent, critical_sent)
                    VALUES (?1, ?2, 0, ?3, 0, 0)
                    "#,
                    params![account_id, limit_bytes, now],
                )?;
            }
        }

        Ok(())
    }

    /// Atomically adds `bytes` to the account's usage and returns the
    /// resulting state. Returns `None` when the account is untracked
    /// (no row, or limit 0) and nothing was changed. The increment is a
    /// single UPDATE statement, never read-then-write.
    pub fn add_usage(
        &self,
        account_id: &str,
        bytes: i64,
    ) -> Result<Option<UsageSnapshot>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            UPDATE transfer_quotas
            SET current_usage_bytes = current_usage_bytes + ?2
            WHERE account_id = ?1 AND monthly_limit_bytes > 0
            RETURNING current_usage_bytes, monthly_limit_bytes, warning_sent, critical_sent
            "#,
        )?;

        let snapshot = stmt
            .query_row(params![account_id, bytes], |row| {
                Ok(UsageSnapshot {
                    usage_bytes: row.get(0)?,
                    limit_bytes: row.get(1)?,
                    warning_sent: row.get::<_, i64>(2)? != 0,
                    critical_sent: row.get::<_, i64>(3)? != 0,
                })
            })
            .optional()?;
        Ok(snapshot)
    }

    /// Compare-and-set a latch from unset to set. Returns true only for the
    /// caller that actually flipped it, so a crossing fires exactly once even
    /// under concurrent evaluation.
    pub fn claim_latch(&self, account_id: &str, latch: Latch) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE transfer_quotas SET {col} = 1 WHERE account_id = ?1 AND {col} = 0",
            col = latch.column()
        );
        let changed = conn.execute(&sql, params![account_id])?;
        Ok(changed == 1)
    }

    pub fn clear_latches(&self, account_id: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE transfer_quotas SET warning_sent = 0, critical_sent = 0 WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }

    pub fn reset_usage(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE transfer_quotas
            SET current_usage_bytes = 0, last_reset = ?2, warning_sent = 0, critical_sent = 0
            WHERE account_id = ?1
            "#,
            params![account_id, now],
        )?;
        Ok(())
    }

    pub fn reset_all(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE transfer_quotas
            SET current_usage_bytes = 0, last_reset = ?1, warning_sent = 0, critical_sent = 0
            "#,
            params![now],
        )?;
        Ok(changed)
    }

    /// Claims a transfer identity in the shared idempotency store. Returns
    /// true on first sighting within the window; false when the identity was
    /// already reported. Expired entries are purged first, and the table is
    /// kept under `cap` by evicting the oldest entries.
    pub fn claim_transfer(
        &self,
        identity: &str,
        now: DateTime<Utc>,
        window_secs: i64,
        cap: usize,
    ) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let cutoff = now - chrono::Duration::seconds(window_secs);
        conn.execute(
            "DELETE FROM dedup_entries WHERE datetime(first_seen) < datetime(?1)",
            params![cutoff],
        )?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dedup_entries (identity, first_seen) VALUES (?1, ?2)",
            params![identity, now],
        )?;

        if inserted == 1 {
            let evicted = conn.execute(
                r#"
                DELETE FROM dedup_entries WHERE identity NOT IN (
                    SELECT identity FROM dedup_entries
                    ORDER BY datetime(first_seen) DESC
                    LIMIT ?1
                )
                "#,
                params![cap as i64],
            )?;
            if evicted > 0 {
                debug!(evicted, "evicted oldest dedup entries over capacity");
            }
        }

        Ok(inserted == 1)
    }

    pub fn watermark(&self, account_id: &str) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT last_processed_count FROM aggregation_watermarks WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    /// Advances the watermark; never moves it backwards.
    pub fn advance_watermark(&self, account_id: &str, count: i64) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO aggregation_watermarks (account_id, last_processed_count)
            VALUES (?1, ?2)
            ON CONFLICT(account_id) DO UPDATE SET
                last_processed_count = MAX(last_processed_count, excluded.last_processed_count)
            "#,
            params![account_id, count],
        )?;
        Ok(())
    }

    pub fn upsert_activity_count(
        &self,
        account_id: &str,
        download_count: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if download_count < 0 {
            return Err(StorageError::InvalidValue(
                "download count must not be negative".into(),
            ));
        }

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO activity_counters (account_id, download_count, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(account_id) DO UPDATE SET
                download_count = excluded.download_count,
                updated_at = excluded.updated_at
            "#,
            params![account_id, download_count, now],
        )?;
        Ok(())
    }

    pub fn list_activity_counters(&self) -> Result<Vec<ActivityCounter>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT account_id, download_count, updated_at
            FROM activity_counters
            WHERE download_count > 0
            ORDER BY account_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ActivityCounter {
                account_id: row.get(0)?,
                download_count: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;

        let mut counters = Vec::new();
        for row in rows {
            counters.push(row?);
        }
        Ok(counters)
    }

    pub fn load_thresholds(&self) -> Result<Option<(u8, u8)>, StorageError> {
        let conn = self.lock()?;
        let warning = read_setting(&conn, SETTING_WARNING_PCT)?;
        let critical = read_setting(&conn, SETTING_CRITICAL_PCT)?;

        match (warning, critical) {
            (Some(w), Some(c)) => Ok(Some((w, c))),
            _ => Ok(None),
        }
    }

    /// The `YYYY-MM` month of the last completed monthly reset, if any.
    pub fn last_reset_month(&self) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![SETTING_LAST_RESET_MONTH],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn record_reset_month(&self, month: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![SETTING_LAST_RESET_MONTH, month],
        )?;
        Ok(())
    }

    pub fn save_thresholds(&self, warning_pct: u8, critical_pct: u8) -> Result<(), StorageError> {
        let conn = self.lock()?;
        for (key, value) in [
            (SETTING_WARNING_PCT, warning_pct),
            (SETTING_CRITICAL_PCT, critical_pct),
        ] {
            conn.execute(
                r#"
                INSERT INTO settings (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key, value.to_string()],
            )?;
        }
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuotaRecord> {
    Ok(QuotaRecord {
        account_id: row.get(0)?,
        monthly_limit_bytes: row.get(1)?,
        current_usage_bytes: row.get(2)?,
        last_reset: row.get(3)?,
        warning_sent: row.get::<_, i64>(4)? != 0,
        critical_sent: row.get::<_, i64>(5)? != 0,
    })
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<u8>, StorageError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(raw) => raw
            .parse::<u8>()
            .map(Some)
            .map_err(|_| StorageError::InvalidValue(format!("setting {key} is not a percentage"))),
        None => Ok(None),
    }
}
