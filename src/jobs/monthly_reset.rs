use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ledger::{LedgerError, TransferLedger};
use crate::storage::QuotaDatabase;

/// Resets every account's usage on the first calendar day of the month.
/// Ticks daily rather than monthly so a long sleep interval cannot step over
/// the boundary; a tick on any other day does nothing. The month of the last
/// completed reset is persisted, so later ticks and process restarts on
/// day 1 do not reset a second time. If the process is down for the whole of
/// day 1, that month's reset is skipped with no catch-up.
pub struct MonthlyResetJob {
    storage: Arc<QuotaDatabase>,
    ledger: Arc<TransferLedger>,
    tick_interval: Duration,
}

impl MonthlyResetJob {
    pub fn new(
        storage: Arc<QuotaDatabase>,
        ledger: Arc<TransferLedger>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            storage,
            ledger,
            tick_interval,
        }
    }

    pub fn is_reset_day(date: NaiveDate) -> bool {
        date.day() == 1
    }

    /// Runs the calendar gate for the given date. Returns the number of
    /// records reset, or `None` when the date is not the first of the month
    /// or this month's reset already ran.
    pub fn run_once(&self, today: NaiveDate) -> Result<Option<usize>, LedgerError> {
        if !Self::is_reset_day(today) {
            return Ok(None);
        }

        let month = today.format("%Y-%m").to_string();
        if self.storage.last_reset_month()?.as_deref() == Some(month.as_str()) {
            debug!(month, "monthly reset already completed, skipping");
            return Ok(None);
        }

        info!(month, "running monthly transfer quota reset");
        let count = self.ledger.reset_all()?;
        self.storage.record_reset_month(&month)?;
        Ok(Some(count))
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.run_once(Utc::now().date_naive()) {
                    Ok(Some(count)) => {
                        info!(accounts = count, "monthly transfer quota reset completed");
                    }
                    Ok(None) => {
                        debug!("no monthly reset due");
                    }
                    Err(err) => {
                        error!(error = %err, "monthly transfer quota reset failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_is_a_reset_day() {
        let first = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 7, 31).unwrap();

        assert!(MonthlyResetJob::is_reset_day(first));
        assert!(!MonthlyResetJob::is_reset_day(second));
        assert!(!MonthlyResetJob::is_reset_day(last));
    }
}
