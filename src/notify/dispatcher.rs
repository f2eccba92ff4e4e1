use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::directory::AccountDirectory;
use super::format_bytes;
use super::suppression::SuppressionCache;
use super::transport::{EmailTransport, NotificationSink};
use super::types::{AccountInfo, EmailMessage, InAppNotification, SubjectKind};

/// A threshold crossing the ledger decided to announce.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub account_id: String,
    pub subject: SubjectKind,
    pub percent: f64,
    pub threshold: u8,
    pub usage_bytes: i64,
    pub limit_bytes: i64,
}

/// Fans a firing decision out to the in-app sink, the account holder's
/// mailbox, and (for critical crossings) every admin with an address. Each
/// send is attempted independently; a failed channel never rolls back the
/// latch the ledger already committed.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    mailer: Arc<dyn EmailTransport>,
    directory: Arc<dyn AccountDirectory>,
    suppression: SuppressionCache,
}

impl NotificationDispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        mailer: Arc<dyn EmailTransport>,
        directory: Arc<dyn AccountDirectory>,
        suppression: SuppressionCache,
    ) -> Self {
        Self {
            sink,
            mailer,
            directory,
            suppression,
        }
    }

    pub async fn dispatch(&self, event: AlertEvent) {
        let Some(account) = self.directory.lookup(&event.account_id) else {
            warn!(
                account_id = %event.account_id,
                "account not found in directory, skipping notifications"
            );
            return;
        };

        // Recorded only once a recipient is resolved, so a dispatch that
        // delivered nothing does not swallow the next attempt.
        if self.suppression.check_and_record(&event.account_id, event.subject) {
            debug!(
                account_id = %event.account_id,
                subject = %event.subject,
                "alert suppressed, identical subject dispatched recently"
            );
            return;
        }

        let notification = InAppNotification {
            id: Uuid::new_v4(),
            account_id: event.account_id.clone(),
            subject: event.subject,
            percent: event.percent,
            threshold: event.threshold,
            created_at: Utc::now(),
        };

        if let Err(err) = self.sink.notify(&notification).await {
            error!(
                account_id = %event.account_id,
                error = %err,
                "failed to deliver in-app notification"
            );
        }

        self.send_account_email(&account, &event).await;

        if event.subject == SubjectKind::Critical {
            self.send_admin_emails(&account, &event).await;
        }

        info!(
            account_id = %event.account_id,
            subject = %event.subject,
            percent = event.percent,
            "dispatched quota alert"
        );
    }

    async fn send_account_email(&self, account: &AccountInfo, event: &AlertEvent) {
        let Some(email) = account.email.as_deref() else {
            warn!(
                account_id = %account.id,
                "account has no email address, skipping quota email"
            );
            return;
        };

        let message = compose_account_email(account, email, event);
        if let Err(err) = self.mailer.send(&message).await {
            error!(
                account_id = %account.id,
                error = %err,
                "failed to send quota email"
            );
        }
    }

    async fn send_admin_emails(&self, account: &AccountInfo, event: &AlertEvent) {
        let admins = self.directory.admins();
        if admins.is_empty() {
            warn!("no admin accounts found to notify about quota breach");
            return;
        }

        for admin in admins {
            let Some(admin_email) = admin.email.as_deref() else {
                continue;
            };

            let message = compose_admin_email(&admin, admin_email, account, event);
            if let Err(err) = self.mailer.send(&message).await {
                error!(
                    admin_id = %admin.id,
                    account_id = %account.id,
                    error = %err,
                    "failed to send admin notification email"
                );
            }
        }
    }
}

fn compose_account_email(account: &AccountInfo, email: &str, event: &AlertEvent) -> EmailMessage {
    let subject = match event.subject {
        SubjectKind::Warning => "Warning: Data transfer limit approaching".to_string(),
        SubjectKind::Critical => "CRITICAL: Data transfer limit almost reached".to_string(),
    };

    let mut body = format!(
        "Hello {},\n\nYour data transfer usage has reached {:.0}% of your monthly limit.\n",
        account.display_name, event.percent
    );
    if event.subject == SubjectKind::Critical {
        body.push_str(
            "You may soon be unable to upload or download files if you reach 100% of your limit.\n",
        );
    }
    body.push_str(&format!(
        "\nCurrent usage: {} of {} ({:.0}%)\n\nIf you need more transfer capacity, please contact your administrator.\n",
        format_bytes(event.usage_bytes),
        format_bytes(event.limit_bytes),
        event.percent
    ));

    EmailMessage {
        to: email.to_string(),
        to_name: account.display_name.clone(),
        subject,
        body,
    }
}

fn compose_admin_email(
    admin: &AccountInfo,
    admin_email: &str,
    account: &AccountInfo,
    event: &AlertEvent,
) -> EmailMessage {
    let body = format!(
        "Hello {},\n\nUser {} ({}) has exceeded {:.0}% of their monthly data transfer limit.\n\nCurrent usage: {} of {} ({:.0}%)\n",
        admin.display_name,
        account.display_name,
        account.id,
        event.percent,
        format_bytes(event.usage_bytes),
        format_bytes(event.limit_bytes),
        event.percent
    );

    EmailMessage {
        to: admin_email.to_string(),
        to_name: admin.display_name.clone(),
        subject: format!("User {} has exceeded transfer quota", account.id),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, email: Option<&str>) -> AccountInfo {
        AccountInfo {
            id: id.to_string(),
            display_name: format!("{id} Display"),
            email: email.map(str::to_string),
            admin: false,
        }
    }

    fn event(subject: SubjectKind) -> AlertEvent {
        AlertEvent {
            account_id: "alice".to_string(),
            subject,
            percent: 83.0,
            threshold: 80,
            usage_bytes: 83 * 1024 * 1024,
            limit_bytes: 100 * 1024 * 1024,
        }
    }

    #[test]
    fn warning_email_omits_critical_wording() {
        let account = account("alice", Some("alice@example.com"));
        let message = compose_account_email(&account, "alice@example.com", &event(SubjectKind::Warning));

        assert_eq!(message.subject, "Warning: Data transfer limit approaching");
        assert!(!message.body.contains("unable to upload"));
        assert!(message.body.contains("83%"));
    }

    #[test]
    fn critical_email_warns_about_cutoff() {
        let account = account("alice", Some("alice@example.com"));
        let message = compose_account_email(&account, "alice@example.com", &event(SubjectKind::Critical));

        assert_eq!(message.subject, "CRITICAL: Data transfer limit almost reached");
        assert!(message.body.contains("unable to upload"));
    }

    #[test]
    fn admin_email_names_the_offending_account() {
        let admin = account("root", Some("root@example.com"));
        let offender = account("alice", Some("alice@example.com"));
        let message =
            compose_admin_email(&admin, "root@example.com", &offender, &event(SubjectKind::Critical));

        assert_eq!(message.subject, "User alice has exceeded transfer quota");
        assert!(message.body.contains("alice"));
    }
}
