pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod suppression;
pub mod transport;
pub mod types;

pub use directory::{AccountDirectory, StaticAccountDirectory};
pub use dispatcher::{AlertEvent, NotificationDispatcher};
pub use error::NotifyError;
pub use suppression::SuppressionCache;
pub use transport::{
    EmailTransport, HttpMailer, HttpNotificationSink, LogOnlyMailer, LogOnlySink,
    NotificationSink,
};
pub use types::{AccountInfo, EmailMessage, InAppNotification, SubjectKind};

/// Human-readable byte formatting used in alert emails.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let mut value = bytes.max(0) as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", value as i64, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::format_bytes;

    #[test]
    fn formats_small_values_without_fraction() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn formats_larger_units() {
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.00 GB");
    }

    #[test]
    fn clamps_negative_values() {
        assert_eq!(format_bytes(-42), "0 B");
    }
}
