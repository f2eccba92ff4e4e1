pub mod database;
pub mod error;
pub mod schema;

pub use database::{ActivityCounter, Latch, QuotaDatabase, QuotaRecord, UsageSnapshot};
pub use error::StorageError;

pub const QUOTA_DB_FILENAME: &str = "transfer_quotas.db";

pub const SETTING_WARNING_PCT: &str = "warning_threshold_pct";
pub const SETTING_CRITICAL_PCT: &str = "critical_threshold_pct";
pub const SETTING_LAST_RESET_MONTH: &str = "last_reset_month";
