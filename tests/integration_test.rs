use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::{tempdir, TempDir};

use transfer_quota_monitor::ingest::{DedupLayer, IngestOutcome, IngestPipeline, ProbeKind, TransferObservation};
use transfer_quota_monitor::jobs::{AggregationJob, MonthlyResetJob};
use transfer_quota_monitor::ledger::{Thresholds, TransferLedger};
use transfer_quota_monitor::notify::{
    AccountDirectory, AccountInfo, AlertEvent, EmailMessage, EmailTransport, InAppNotification,
    NotificationDispatcher, NotificationSink, NotifyError, StaticAccountDirectory, SubjectKind,
    SuppressionCache,
};
use transfer_quota_monitor::storage::{Latch, QuotaDatabase};

const GIB: i64 = 1024 * 1024 * 1024;
const AVERAGE_FILE_SIZE: i64 = 2 * 1024 * 1024;

#[derive(Default)]
struct RecordingSink {
    notifications: Mutex<Vec<InAppNotification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &InAppNotification) -> Result<(), NotifyError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn count(&self, subject: SubjectKind) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.subject == subject)
            .count()
    }
}

#[derive(Default)]
struct RecordingMailer {
    messages: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailTransport for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

impl RecordingMailer {
    fn recipients(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.clone())
            .collect()
    }
}

struct Harness {
    _temp: TempDir,
    storage: Arc<QuotaDatabase>,
    ledger: Arc<TransferLedger>,
    sink: Arc<RecordingSink>,
    mailer: Arc<RecordingMailer>,
}

fn accounts() -> Vec<AccountInfo> {
    vec![
        AccountInfo {
            id: "alice".to_string(),
            display_name: "Alice".to_string(),
            email: Some("alice@example.com".to_string()),
            admin: false,
        },
        AccountInfo {
            id: "bob".to_string(),
            display_name: "Bob".to_string(),
            email: None,
            admin: false,
        },
        AccountInfo {
            id: "root".to_string(),
            display_name: "Root".to_string(),
            email: Some("root@example.com".to_string()),
            admin: true,
        },
    ]
}

fn harness() -> Harness {
    let temp = tempdir().expect("failed to create temp dir");
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).expect("database"));
    let sink = Arc::new(RecordingSink::default());
    let mailer = Arc::new(RecordingMailer::default());
    let directory = Arc::new(StaticAccountDirectory::new(accounts()));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::clone(&mailer) as Arc<dyn EmailTransport>,
        directory,
        SuppressionCache::new(Duration::ZERO),
    ));

    let ledger = Arc::new(
        TransferLedger::new(
            Arc::clone(&storage),
            dispatcher,
            Thresholds {
                warning_pct: 80,
                critical_pct: 95,
            },
        )
        .expect("ledger"),
    );

    Harness {
        _temp: temp,
        storage,
        ledger,
        sink,
        mailer,
    }
}

#[tokio::test]
async fn warning_then_critical_fire_exactly_once() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();

    // 70%: below both thresholds.
    h.ledger.add_transfer("alice", 7 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 0);

    // 80%: warning crossing.
    h.ledger.add_transfer("alice", GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
    assert_eq!(h.sink.count(SubjectKind::Critical), 0);

    // 90%: latched, no repeat.
    h.ledger.add_transfer("alice", GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);

    // 96%: critical crossing, warning stays latched.
    h.ledger.add_transfer("alice", 6 * GIB / 10).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
    assert_eq!(h.sink.count(SubjectKind::Critical), 1);

    // Past 100%: everything already latched.
    h.ledger.add_transfer("alice", GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
    assert_eq!(h.sink.count(SubjectKind::Critical), 1);
}

#[tokio::test]
async fn untracked_account_records_nothing() {
    let h = harness();

    h.ledger.add_transfer("alice", 50 * GIB).await.unwrap();

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.monthly_limit_bytes, 0);
    assert_eq!(record.current_usage_bytes, 0);
    assert_eq!(h.sink.count(SubjectKind::Warning), 0);
}

#[tokio::test]
async fn critical_crossing_notifies_admins() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 10 * GIB).await.unwrap();

    let recipients = h.mailer.recipients();
    assert!(recipients.contains(&"alice@example.com".to_string()));
    assert!(recipients.contains(&"root@example.com".to_string()));

    let messages = h.mailer.messages.lock().unwrap();
    let admin_mail = messages
        .iter()
        .find(|m| m.to == "root@example.com")
        .expect("admin email");
    assert_eq!(admin_mail.subject, "User alice has exceeded transfer quota");
}

#[tokio::test]
async fn account_without_email_still_gets_in_app_notification() {
    let h = harness();
    h.ledger.set_quota("bob", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("bob", 9 * GIB).await.unwrap();

    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
    assert!(!h.mailer.recipients().contains(&"bob".to_string()));
}

#[tokio::test]
async fn unchanged_limit_preserves_latches() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);

    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
}

#[tokio::test]
async fn changed_limit_reevaluates_existing_usage() {
    let h = harness();
    h.ledger.set_quota("alice", 100 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 0);

    // Lowering the ceiling puts existing usage at 90%.
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
    assert_eq!(h.sink.count(SubjectKind::Critical), 0);
}

#[tokio::test]
async fn setting_limit_to_zero_stops_tracking() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 5 * GIB).await.unwrap();

    h.ledger.set_quota("alice", 0).await.unwrap();
    h.ledger.add_transfer("alice", 20 * GIB).await.unwrap();

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, 5 * GIB);
    assert_eq!(h.sink.count(SubjectKind::Warning), 0);
}

#[tokio::test]
async fn reset_clears_usage_and_rearms_latches() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);

    h.ledger.reset_usage("alice").unwrap();
    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, 0);
    assert!(!record.warning_sent);

    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 2);
}

#[tokio::test]
async fn thresholds_persist_across_restart() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).unwrap());

    let build = |storage: &Arc<QuotaDatabase>| {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(RecordingSink::default()) as Arc<dyn NotificationSink>,
            Arc::new(RecordingMailer::default()) as Arc<dyn EmailTransport>,
            Arc::new(StaticAccountDirectory::new(accounts())),
            SuppressionCache::new(Duration::ZERO),
        ));
        TransferLedger::new(
            Arc::clone(storage),
            dispatcher,
            Thresholds {
                warning_pct: 80,
                critical_pct: 95,
            },
        )
        .unwrap()
    };

    let ledger = build(&storage);
    ledger
        .set_thresholds(Thresholds {
            warning_pct: 70,
            critical_pct: 90,
        })
        .await
        .unwrap();
    drop(ledger);

    let restored = build(&storage);
    let thresholds = restored.thresholds().unwrap();
    assert_eq!(thresholds.warning_pct, 70);
    assert_eq!(thresholds.critical_pct, 90);
}

#[tokio::test]
async fn threshold_change_rechecks_all_accounts() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 75 * GIB / 10).await.unwrap();
    assert_eq!(h.sink.count(SubjectKind::Warning), 0);

    let checked = h
        .ledger
        .set_thresholds(Thresholds {
            warning_pct: 70,
            critical_pct: 90,
        })
        .await
        .unwrap();

    assert_eq!(checked, 1);
    assert_eq!(h.sink.count(SubjectKind::Warning), 1);
}

#[tokio::test]
async fn pipeline_collapses_duplicate_object_reports() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();

    let dedup = DedupLayer::new(Arc::clone(&h.storage), 300, 10_000);
    let pipeline = IngestPipeline::new(dedup, Arc::clone(&h.ledger));

    let observation = |probe: ProbeKind| TransferObservation {
        probe,
        account_id: "alice".to_string(),
        bytes: GIB,
        object_id: Some("4711".to_string()),
        action: Some("read".to_string()),
        path: Some("/photos/cat.jpg".to_string()),
        observed_at: Utc::now(),
    };

    assert_eq!(
        pipeline.report(observation(ProbeKind::NodeRead)).await,
        IngestOutcome::Forwarded
    );
    assert_eq!(
        pipeline.report(observation(ProbeKind::WebdavGet)).await,
        IngestOutcome::Duplicate
    );
    assert_eq!(
        pipeline.report(observation(ProbeKind::Middleware)).await,
        IngestOutcome::Duplicate
    );

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, GIB);
}

#[tokio::test]
async fn pipeline_discards_invalid_reports() {
    let h = harness();
    let dedup = DedupLayer::new(Arc::clone(&h.storage), 300, 10_000);
    let pipeline = IngestPipeline::new(dedup, Arc::clone(&h.ledger));

    let mut observation = TransferObservation {
        probe: ProbeKind::ShareLink,
        account_id: "  ".to_string(),
        bytes: GIB,
        object_id: None,
        action: None,
        path: Some("/doc.pdf".to_string()),
        observed_at: Utc::now(),
    };
    assert_eq!(
        pipeline.report(observation.clone()).await,
        IngestOutcome::Discarded
    );

    observation.account_id = "alice".to_string();
    observation.bytes = 0;
    assert_eq!(pipeline.report(observation).await, IngestOutcome::Discarded);
}

#[test]
fn dedup_window_expires_identities() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).unwrap());
    let dedup = DedupLayer::new(Arc::clone(&storage), 300, 10_000);

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    assert!(dedup.first_sighting_at("obj:1:read", t0).unwrap());
    assert!(!dedup
        .first_sighting_at("obj:1:read", t0 + chrono::Duration::seconds(60))
        .unwrap());
    // Past the window the old claim is purged and the identity is fresh.
    assert!(dedup
        .first_sighting_at("obj:1:read", t0 + chrono::Duration::seconds(400))
        .unwrap());
}

#[test]
fn dedup_capacity_evicts_oldest_first() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).unwrap());
    let dedup = DedupLayer::new(Arc::clone(&storage), 3600, 3);

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    for (i, offset) in [0i64, 10, 20, 30].iter().enumerate() {
        assert!(dedup
            .first_sighting_at(
                &format!("obj:{i}:read"),
                t0 + chrono::Duration::seconds(*offset)
            )
            .unwrap());
    }

    // The oldest entry fell out of the capped table, so it claims as new;
    // the newest is still held.
    let later = t0 + chrono::Duration::seconds(40);
    assert!(dedup.first_sighting_at("obj:0:read", later).unwrap());
    assert!(!dedup.first_sighting_at("obj:3:read", later).unwrap());
}

#[tokio::test]
async fn aggregation_folds_counter_deltas_once() {
    let h = harness();
    h.ledger.set_quota("alice", 1000 * GIB).await.unwrap();
    let job = AggregationJob::new(
        Arc::clone(&h.storage),
        Arc::clone(&h.ledger),
        AVERAGE_FILE_SIZE,
        Duration::from_secs(300),
    );

    h.storage
        .upsert_activity_count("alice", 30, Utc::now())
        .unwrap();

    let stats = job.run_once().await.unwrap();
    assert_eq!(stats.accounts_processed, 1);
    assert_eq!(stats.estimated_bytes, 30 * AVERAGE_FILE_SIZE);

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, 30 * AVERAGE_FILE_SIZE);

    // Same counter value again: nothing to fold.
    let stats = job.run_once().await.unwrap();
    assert_eq!(stats.accounts_processed, 0);
    assert_eq!(stats.estimated_bytes, 0);

    // Counter moved forward: only the delta is folded.
    h.storage
        .upsert_activity_count("alice", 37, Utc::now())
        .unwrap();
    let stats = job.run_once().await.unwrap();
    assert_eq!(stats.estimated_bytes, 7 * AVERAGE_FILE_SIZE);

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, 37 * AVERAGE_FILE_SIZE);
}

#[tokio::test]
async fn monthly_reset_only_runs_on_the_first() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();

    let job = MonthlyResetJob::new(
        Arc::clone(&h.storage),
        Arc::clone(&h.ledger),
        Duration::from_secs(86_400),
    );

    let mid_month = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
    assert_eq!(job.run_once(mid_month).unwrap(), None);
    assert_eq!(
        h.ledger.get_quota("alice").unwrap().current_usage_bytes,
        9 * GIB
    );

    let first = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
    assert_eq!(job.run_once(first).unwrap(), Some(1));

    let record = h.ledger.get_quota("alice").unwrap();
    assert_eq!(record.current_usage_bytes, 0);
    assert!(!record.warning_sent);
    assert_eq!(record.monthly_limit_bytes, 10 * GIB);
}

#[tokio::test]
async fn monthly_reset_runs_once_per_month_across_restarts() {
    let h = harness();
    h.ledger.set_quota("alice", 10 * GIB).await.unwrap();
    h.ledger.add_transfer("alice", 9 * GIB).await.unwrap();

    let first = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
    let job = MonthlyResetJob::new(
        Arc::clone(&h.storage),
        Arc::clone(&h.ledger),
        Duration::from_secs(86_400),
    );
    assert_eq!(job.run_once(first).unwrap(), Some(1));

    // Usage accrued after the reset survives later ticks the same day.
    h.ledger.add_transfer("alice", 2 * GIB).await.unwrap();
    assert_eq!(job.run_once(first).unwrap(), None);

    // A fresh job over the same database, as after a process restart.
    let restarted = MonthlyResetJob::new(
        Arc::clone(&h.storage),
        Arc::clone(&h.ledger),
        Duration::from_secs(86_400),
    );
    assert_eq!(restarted.run_once(first).unwrap(), None);
    assert_eq!(
        h.ledger.get_quota("alice").unwrap().current_usage_bytes,
        2 * GIB
    );

    // The next month's first day resets again.
    let next_first = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
    assert_eq!(restarted.run_once(next_first).unwrap(), Some(1));
    assert_eq!(
        h.ledger.get_quota("alice").unwrap().current_usage_bytes,
        0
    );
}

#[test]
fn concurrent_increments_lose_nothing() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).unwrap());
    storage.set_limit("alice", 1000 * GIB, Utc::now()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                storage.add_usage("alice", 1024).unwrap().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let record = storage.get_record("alice").unwrap().unwrap();
    assert_eq!(record.current_usage_bytes, 8 * 50 * 1024);
}

#[test]
fn latch_claim_has_a_single_winner() {
    let temp = tempdir().unwrap();
    let storage = Arc::new(QuotaDatabase::new(temp.path().to_path_buf()).unwrap());
    storage.set_limit("alice", 10 * GIB, Utc::now()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            storage.claim_latch("alice", Latch::Warning).unwrap()
        }));
    }

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn undeliverable_dispatch_does_not_suppress_later_delivery() {
    // Directory whose accounts appear after startup, like a host platform
    // provisioning a user between two alerts.
    #[derive(Default)]
    struct LateDirectory {
        accounts: Mutex<Vec<AccountInfo>>,
    }

    impl AccountDirectory for LateDirectory {
        fn lookup(&self, account_id: &str) -> Option<AccountInfo> {
            self.accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == account_id)
                .cloned()
        }

        fn admins(&self) -> Vec<AccountInfo> {
            Vec::new()
        }
    }

    let sink = Arc::new(RecordingSink::default());
    let directory = Arc::new(LateDirectory::default());
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::new(RecordingMailer::default()) as Arc<dyn EmailTransport>,
        Arc::clone(&directory) as Arc<dyn AccountDirectory>,
        SuppressionCache::new(Duration::from_secs(300)),
    );

    let event = AlertEvent {
        account_id: "alice".to_string(),
        subject: SubjectKind::Warning,
        percent: 83.0,
        threshold: 80,
        usage_bytes: 83 * GIB / 10,
        limit_bytes: 10 * GIB,
    };

    // Unknown account: nothing delivered, nothing recorded.
    dispatcher.dispatch(event.clone()).await;
    assert_eq!(sink.count(SubjectKind::Warning), 0);

    directory.accounts.lock().unwrap().push(AccountInfo {
        id: "alice".to_string(),
        display_name: "Alice".to_string(),
        email: Some("alice@example.com".to_string()),
        admin: false,
    });

    dispatcher.dispatch(event).await;
    assert_eq!(sink.count(SubjectKind::Warning), 1);
}

#[tokio::test]
async fn suppression_swallows_repeat_dispatch() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::new(RecordingMailer::default()) as Arc<dyn EmailTransport>,
        Arc::new(StaticAccountDirectory::new(accounts())),
        SuppressionCache::new(Duration::from_secs(300)),
    );

    let event = AlertEvent {
        account_id: "alice".to_string(),
        subject: SubjectKind::Warning,
        percent: 83.0,
        threshold: 80,
        usage_bytes: 83 * GIB / 10,
        limit_bytes: 10 * GIB,
    };

    dispatcher.dispatch(event.clone()).await;
    dispatcher.dispatch(event).await;

    assert_eq!(sink.count(SubjectKind::Warning), 1);
}
