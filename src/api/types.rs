use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::{IngestOutcome, ProbeKind};
use crate::jobs::AggregationStats;
use crate::storage::QuotaRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTransferRequest {
    pub probe: ProbeKind,
    pub account_id: String,
    pub bytes: i64,
    pub object_id: Option<String>,
    pub action: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTransferResponse {
    pub outcome: IngestOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaView {
    pub account_id: String,
    pub monthly_limit_bytes: i64,
    pub current_usage_bytes: i64,
    pub percent_used: f64,
    pub last_reset: DateTime<Utc>,
    pub warning_sent: bool,
    pub critical_sent: bool,
}

impl From<QuotaRecord> for QuotaView {
    fn from(record: QuotaRecord) -> Self {
        let percent_used = record.percent_used();
        Self {
            account_id: record.account_id,
            monthly_limit_bytes: record.monthly_limit_bytes,
            current_usage_bytes: record.current_usage_bytes,
            percent_used,
            last_reset: record.last_reset,
            warning_sent: record.warning_sent,
            critical_sent: record.critical_sent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListQuotasResponse {
    pub quotas: Vec<QuotaView>,
    pub warning_threshold_pct: u8,
    pub critical_threshold_pct: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetQuotaResponse {
    pub quota: QuotaView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLimitRequest {
    pub account_id: String,
    pub limit_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetThresholdsRequest {
    pub warning_pct: u8,
    pub critical_pct: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetThresholdsResponse {
    pub accounts_checked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertActivityCounterRequest {
    pub account_id: String,
    pub download_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAggregationResponse {
    pub stats: AggregationStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
