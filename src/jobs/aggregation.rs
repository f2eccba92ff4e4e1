use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ledger::{LedgerError, TransferLedger};
use crate::storage::QuotaDatabase;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AggregationStats {
    pub accounts_processed: usize,
    pub estimated_bytes: i64,
}

/// Folds count-only activity signals into the ledger. Some probes only see
/// that a download happened, not how large it was; their running counters
/// are converted to estimated bytes with a fixed average size and tracked
/// through a persisted watermark, so each counter value is folded in once.
pub struct AggregationJob {
    storage: Arc<QuotaDatabase>,
    ledger: Arc<TransferLedger>,
    average_file_size_bytes: i64,
    tick_interval: Duration,
}

impl AggregationJob {
    pub fn new(
        storage: Arc<QuotaDatabase>,
        ledger: Arc<TransferLedger>,
        average_file_size_bytes: i64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            storage,
            ledger,
            average_file_size_bytes,
            tick_interval,
        }
    }

    /// One aggregation pass. Idempotent between counter changes: a delta of
    /// zero makes no ledger call and leaves the watermark alone. A failed
    /// ledger call keeps the watermark back so the next tick retries that
    /// account.
    pub async fn run_once(&self) -> Result<AggregationStats, LedgerError> {
        let counters = self.storage.list_activity_counters()?;
        let mut stats = AggregationStats::default();

        for counter in counters {
            let watermark = self.storage.watermark(&counter.account_id)?;
            let delta = counter.download_count - watermark;
            if delta <= 0 {
                continue;
            }

            let estimated_bytes = delta.saturating_mul(self.average_file_size_bytes);
            debug!(
                account_id = %counter.account_id,
                new_downloads = delta,
                estimated_bytes,
                "folding counted downloads into ledger"
            );

            if let Err(err) = self
                .ledger
                .add_transfer(&counter.account_id, estimated_bytes)
                .await
            {
                error!(
                    account_id = %counter.account_id,
                    error = %err,
                    "failed to fold counted downloads, will retry next tick"
                );
                continue;
            }

            self.storage
                .advance_watermark(&counter.account_id, counter.download_count)?;

            stats.accounts_processed += 1;
            stats.estimated_bytes += estimated_bytes;
        }

        Ok(stats)
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(stats) if stats.accounts_processed > 0 => {
                        info!(
                            accounts = stats.accounts_processed,
                            estimated_bytes = stats.estimated_bytes,
                            "aggregated counted downloads"
                        );
                    }
                    Ok(_) => {
                        debug!("no new counted downloads to aggregate");
                    }
                    Err(err) => {
                        error!(error = %err, "aggregation pass failed");
                    }
                }
            }
        })
    }
}
