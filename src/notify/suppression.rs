use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::types::SubjectKind;

const PRUNE_WATERMARK: usize = 1024;

/// Ephemeral per-process guard against re-dispatching the identical alert
/// subject within a short window. The ledger's latches are the durable
/// source of truth; this cache is defense in depth only and carries no
/// guarantee across restarts.
pub struct SuppressionCache {
    entries: DashMap<(String, SubjectKind), Instant>,
    ttl: Duration,
}

impl SuppressionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns true when the subject was already dispatched within the TTL.
    /// Otherwise records the dispatch and returns false.
    pub fn check_and_record(&self, account_id: &str, subject: SubjectKind) -> bool {
        let key = (account_id.to_string(), subject);

        if let Some(sent_at) = self.entries.get(&key) {
            if sent_at.elapsed() < self.ttl {
                return true;
            }
        }

        self.entries.insert(key, Instant::now());

        if self.entries.len() > PRUNE_WATERMARK {
            let ttl = self.ttl;
            self.entries.retain(|_, sent_at| sent_at.elapsed() < ttl);
        }

        false
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_repeat_subject_within_ttl() {
        let cache = SuppressionCache::new(Duration::from_secs(300));

        assert!(!cache.check_and_record("alice", SubjectKind::Warning));
        assert!(cache.check_and_record("alice", SubjectKind::Warning));
    }

    #[test]
    fn subjects_are_independent() {
        let cache = SuppressionCache::new(Duration::from_secs(300));

        assert!(!cache.check_and_record("alice", SubjectKind::Warning));
        assert!(!cache.check_and_record("alice", SubjectKind::Critical));
        assert!(!cache.check_and_record("bob", SubjectKind::Warning));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn expired_entry_records_again() {
        let cache = SuppressionCache::new(Duration::from_millis(0));

        assert!(!cache.check_and_record("alice", SubjectKind::Warning));
        assert!(!cache.check_and_record("alice", SubjectKind::Warning));
    }
}
