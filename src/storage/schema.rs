use anyhow::Result;
use rusqlite::Connection;

pub const TRANSFER_QUOTAS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_quotas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL UNIQUE,
    monthly_limit_bytes INTEGER NOT NULL DEFAULT 0,
    current_usage_bytes INTEGER NOT NULL DEFAULT 0,
    last_reset TEXT NOT NULL,
    warning_sent INTEGER NOT NULL DEFAULT 0,
    critical_sent INTEGER NOT NULL DEFAULT 0
);
"#;

pub const DEDUP_ENTRIES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dedup_entries (
    identity TEXT PRIMARY KEY,
    first_seen TEXT NOT NULL
);
"#;

pub const AGGREGATION_WATERMARKS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aggregation_watermarks (
    account_id TEXT PRIMARY KEY,
    last_processed_count INTEGER NOT NULL DEFAULT 0
);
"#;

pub const ACTIVITY_COUNTERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS activity_counters (
    account_id TEXT PRIMARY KEY,
    download_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

pub const SETTINGS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub const DEDUP_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_dedup_first_seen ON dedup_entries(first_seen);
"#;

pub fn init_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(TRANSFER_QUOTAS_TABLE_SCHEMA)?;
    conn.execute_batch(DEDUP_ENTRIES_TABLE_SCHEMA)?;
    conn.execute_batch(AGGREGATION_WATERMARKS_TABLE_SCHEMA)?;
    conn.execute_batch(ACTIVITY_COUNTERS_TABLE_SCHEMA)?;
    conn.execute_batch(SETTINGS_TABLE_SCHEMA)?;
    conn.execute_batch(DEDUP_INDEXES)?;
    Ok(())
}
