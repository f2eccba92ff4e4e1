use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info};

use crate::notify::{AlertEvent, NotificationDispatcher, SubjectKind};
use crate::storage::{Latch, QuotaDatabase, QuotaRecord};

use super::error::LedgerError;
use super::thresholds::{evaluate, Latches, Thresholds};

/// The usage ledger: sole owner of quota records and the one component that
/// must stay correct under concurrency. All usage mutation goes through the
/// storage layer's atomic increment; threshold latches are claimed with
/// compare-and-set before any notification is attempted.
pub struct TransferLedger {
    storage: Arc<QuotaDatabase>,
    dispatcher: Arc<NotificationDispatcher>,
    thresholds: RwLock<Thresholds>,
}

impl TransferLedger {
    /// Builds the ledger, restoring persisted thresholds when present and
    /// falling back to the configured defaults otherwise.
    pub fn new(
        storage: Arc<QuotaDatabase>,
        dispatcher: Arc<NotificationDispatcher>,
        defaults: Thresholds,
    ) -> Result<Self, LedgerError> {
        defaults.validate()?;
        let thresholds = match storage.load_thresholds()? {
            Some((warning_pct, critical_pct)) => Thresholds {
                warning_pct,
                critical_pct,
            },
            None => defaults,
        };
        thresholds.validate()?;

        Ok(Self {
            storage,
            dispatcher,
            thresholds: RwLock::new(thresholds),
        })
    }

    pub fn thresholds(&self) -> Result<Thresholds, LedgerError> {
        self.thresholds
            .read()
            .map(|guard| *guard)
            .map_err(|_| LedgerError::Internal("thresholds lock poisoned".into()))
    }

    /// Persists new global thresholds and re-checks every known account
    /// against them, clearing latches so crossings can re-fire.
    pub async fn set_thresholds(&self, thresholds: Thresholds) -> Result<usize, LedgerError> {
        thresholds.validate()?;
        self.storage
            .save_thresholds(thresholds.warning_pct, thresholds.critical_pct)?;
        {
            let mut guard = self
                .thresholds
                .write()
                .map_err(|_| LedgerError::Internal("thresholds lock poisoned".into()))?;
            *guard = thresholds;
        }

        info!(
            warning_pct = thresholds.warning_pct,
            critical_pct = thresholds.critical_pct,
            "updated global thresholds, re-checking all accounts"
        );
        self.force_check_all().await
    }

    /// Returns the account's record, or the default untracked record when
    /// none exists. Never fails for a missing account.
    pub fn get_quota(&self, account_id: &str) -> Result<QuotaRecord, LedgerError> {
        let record = self
            .storage
            .get_record(account_id)?
            .unwrap_or_else(|| QuotaRecord::untracked(account_id, Utc::now()));
        Ok(record)
    }

    pub fn list_quotas(&self) -> Result<Vec<QuotaRecord>, LedgerError> {
        Ok(self.storage.list_records()?)
    }

    /// Upserts an account's monthly limit. A changed limit clears both
    /// latches; afterwards, existing usage is immediately evaluated against
    /// the new ceiling, so an alert can fire purely because the limit moved.
    /// That re-fire is deliberate admin-facing behavior.
    pub async fn set_quota(&self, account_id: &str, limit_bytes: i64) -> Result<(), LedgerError> {
        let existing = self.storage.get_record(account_id)?;
        self.storage.set_limit(account_id, limit_bytes, Utc::now())?;

        let usage_bytes = existing
            .as_ref()
            .map(|record| record.current_usage_bytes)
            .unwrap_or(0);
        let limit_changed = existing
            .as_ref()
            .map(|record| record.monthly_limit_bytes != limit_bytes)
            .unwrap_or(true);

        info!(account_id, limit_bytes, "quota limit updated");

        if limit_bytes > 0 && usage_bytes > 0 {
            let latches = match (&existing, limit_changed) {
                (Some(record), false) => Latches {
                    warning: record.warning_sent,
                    critical: record.critical_sent,
                },
                _ => Latches::cleared(),
            };
            self.evaluate_and_dispatch(account_id, usage_bytes, limit_bytes, latches)
                .await?;
        }

        Ok(())
    }

    /// Records a transfer for the account. Untracked accounts (no record or
    /// limit 0) are a successful no-op. The increment is atomic at the
    /// storage layer; evaluation runs against the resulting usage inline.
    pub async fn add_transfer(&self, account_id: &str, bytes: i64) -> Result<(), LedgerError> {
        if bytes <= 0 {
            return Ok(());
        }

        let Some(snapshot) = self.storage.add_usage(account_id, bytes)? else {
            debug!(account_id, bytes, "account untracked, transfer not recorded");
            return Ok(());
        };

        debug!(
            account_id,
            bytes,
            usage_bytes = snapshot.usage_bytes,
            "recorded transfer"
        );

        self.evaluate_and_dispatch(
            account_id,
            snapshot.usage_bytes,
            snapshot.limit_bytes,
            Latches {
                warning: snapshot.warning_sent,
                critical: snapshot.critical_sent,
            },
        )
        .await
    }

    /// Clears both latches and evaluates the existing usage without touching
    /// it. Used when global thresholds change.
    pub async fn force_check(&self, account_id: &str) -> Result<(), LedgerError> {
        let Some(record) = self.storage.get_record(account_id)? else {
            return Ok(());
        };
        if record.monthly_limit_bytes <= 0 {
            return Ok(());
        }

        self.storage.clear_latches(account_id)?;
        self.evaluate_and_dispatch(
            account_id,
            record.current_usage_bytes,
            record.monthly_limit_bytes,
            Latches::cleared(),
        )
        .await
    }

    pub async fn force_check_all(&self) -> Result<usize, LedgerError> {
        let records = self.storage.list_records()?;
        let mut checked = 0usize;
        for record in records {
            if record.monthly_limit_bytes > 0 {
                self.force_check(&record.account_id).await?;
                checked += 1;
            }
        }
        Ok(checked)
    }

    pub fn reset_usage(&self, account_id: &str) -> Result<(), LedgerError> {
        self.storage.reset_usage(account_id, Utc::now())?;
        info!(account_id, "reset transfer usage");
        Ok(())
    }

    pub fn reset_all(&self) -> Result<usize, LedgerError> {
        let count = self.storage.reset_all(Utc::now())?;
        info!(accounts = count, "reset transfer usage for all accounts");
        Ok(count)
    }

    async fn evaluate_and_dispatch(
        &self,
        account_id: &str,
        usage_bytes: i64,
        limit_bytes: i64,
        latches: Latches,
    ) -> Result<(), LedgerError> {
        let thresholds = self.thresholds()?;
        let decision = evaluate(usage_bytes, limit_bytes, thresholds, latches);

        if decision.fire_warning && self.storage.claim_latch(account_id, Latch::Warning)? {
            self.dispatcher
                .dispatch(AlertEvent {
                    account_id: account_id.to_string(),
                    subject: SubjectKind::Warning,
                    percent: decision.percent_used,
                    threshold: thresholds.warning_pct,
                    usage_bytes,
                    limit_bytes,
                })
                .await;
        }

        if decision.fire_critical && self.storage.claim_latch(account_id, Latch::Critical)? {
            self.dispatcher
                .dispatch(AlertEvent {
                    account_id: account_id.to_string(),
                    subject: SubjectKind::Critical,
                    percent: decision.percent_used,
                    threshold: thresholds.critical_pct,
                    usage_bytes,
                    limit_bytes,
                })
                .await;
        }

        Ok(())
    }
}
