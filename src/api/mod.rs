use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;

use crate::ingest::IngestPipeline;
use crate::jobs::AggregationJob;
use crate::ledger::TransferLedger;
use crate::storage::QuotaDatabase;

pub struct ApiState {
    pub ledger: Arc<TransferLedger>,
    pub pipeline: Arc<IngestPipeline>,
    pub aggregation: Arc<AggregationJob>,
    pub storage: Arc<QuotaDatabase>,
}

impl ApiState {
    pub fn new(
        ledger: Arc<TransferLedger>,
        pipeline: Arc<IngestPipeline>,
        aggregation: Arc<AggregationJob>,
        storage: Arc<QuotaDatabase>,
    ) -> Self {
        Self {
            ledger,
            pipeline,
            aggregation,
            storage,
        }
    }
}
