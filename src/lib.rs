pub mod api;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod ledger;
pub mod notify;
pub mod storage;

pub use api::{create_router, ApiState};
pub use config::MonitorConfig;
pub use ingest::{DedupLayer, IngestOutcome, IngestPipeline, ProbeKind, TransferObservation};
pub use jobs::{AggregationJob, AggregationStats, MonthlyResetJob};
pub use ledger::{LedgerError, Thresholds, TransferLedger};
pub use notify::{
    AccountDirectory, AccountInfo, AlertEvent, NotificationDispatcher, StaticAccountDirectory,
    SubjectKind, SuppressionCache,
};
pub use storage::{QuotaDatabase, QuotaRecord};
