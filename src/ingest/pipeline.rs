use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::ledger::TransferLedger;

use super::dedup::DedupLayer;
use super::identity::{transfer_identity, TransferObservation};

/// What happened to a probe report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First sighting, forwarded to the ledger.
    Forwarded,
    /// Same identity already reported within the dedup window.
    Duplicate,
    /// Invalid report or a failure on the way to the ledger; logged and
    /// dropped so probe errors never reach the host's request path.
    Discarded,
}

/// The single entrypoint every probe variant funnels through: identity
/// construction, the dedup claim, then at most one ledger call per transfer.
pub struct IngestPipeline {
    dedup: DedupLayer,
    ledger: Arc<TransferLedger>,
}

impl IngestPipeline {
    pub fn new(dedup: DedupLayer, ledger: Arc<TransferLedger>) -> Self {
        Self { dedup, ledger }
    }

    pub async fn report(&self, observation: TransferObservation) -> IngestOutcome {
        if observation.account_id.trim().is_empty() {
            debug!(probe = %observation.probe, "report without account id, discarding");
            return IngestOutcome::Discarded;
        }
        if observation.bytes <= 0 {
            debug!(
                probe = %observation.probe,
                account_id = %observation.account_id,
                bytes = observation.bytes,
                "report without positive byte count, discarding"
            );
            return IngestOutcome::Discarded;
        }

        let identity = transfer_identity(&observation);

        match self.dedup.first_sighting(&identity) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    identity = %identity,
                    probe = %observation.probe,
                    "duplicate transfer report collapsed"
                );
                return IngestOutcome::Duplicate;
            }
            Err(err) => {
                error!(
                    identity = %identity,
                    error = %err,
                    "dedup claim failed, discarding report"
                );
                return IngestOutcome::Discarded;
            }
        }

        match self
            .ledger
            .add_transfer(&observation.account_id, observation.bytes)
            .await
        {
            Ok(()) => IngestOutcome::Forwarded,
            Err(err) => {
                error!(
                    account_id = %observation.account_id,
                    bytes = observation.bytes,
                    error = %err,
                    "failed to record transfer"
                );
                IngestOutcome::Discarded
            }
        }
    }
}
