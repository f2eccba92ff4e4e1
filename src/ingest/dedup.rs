use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::storage::{QuotaDatabase, StorageError};

/// Shared idempotency gate in front of the ledger. Identities are claimed in
/// the persisted dedup table, so concurrent stateless workers agree on which
/// sighting of a transfer was first. Entries expire after the window and the
/// table is capped with oldest-first eviction.
pub struct DedupLayer {
    storage: Arc<QuotaDatabase>,
    window_secs: i64,
    max_entries: usize,
}

impl DedupLayer {
    pub fn new(storage: Arc<QuotaDatabase>, window_secs: u64, max_entries: usize) -> Self {
        Self {
            storage,
            window_secs: window_secs as i64,
            max_entries,
        }
    }

    /// True when this identity has not been seen within the window. The
    /// claim itself is atomic, so only one caller gets `true` per window.
    pub fn first_sighting(&self, identity: &str) -> Result<bool, StorageError> {
        self.first_sighting_at(identity, Utc::now())
    }

    pub fn first_sighting_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.storage
            .claim_transfer(identity, now, self.window_secs, self.max_entries)
    }
}
