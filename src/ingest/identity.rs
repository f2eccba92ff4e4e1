use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds per identity time bucket for probes without a stable object id.
const SIGNATURE_BUCKET_SECS: i64 = 60;

/// The detection mechanism that observed a transfer. Every probe variant
/// reports through the same pipeline; none keeps its own notion of "already
/// processed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    NodeRead,
    WebdavGet,
    ShareLink,
    Middleware,
    Preview,
    FileOperation,
    ActivityLog,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeKind::NodeRead => "node_read",
            ProbeKind::WebdavGet => "webdav_get",
            ProbeKind::ShareLink => "share_link",
            ProbeKind::Middleware => "middleware",
            ProbeKind::Preview => "preview",
            ProbeKind::FileOperation => "file_operation",
            ProbeKind::ActivityLog => "activity_log",
        };
        write!(f, "{name}")
    }
}

/// A raw transfer report from one probe. `object_id` + `action` form the
/// stable identity when the probe has them; otherwise the normalized path,
/// account, and a coarse time bucket stand in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferObservation {
    pub probe: ProbeKind,
    pub account_id: String,
    pub bytes: i64,
    pub object_id: Option<String>,
    pub action: Option<String>,
    pub path: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Builds the dedup key for an observation. Two probes that agree on the
/// object id and action collapse to one transfer; probes that only know a
/// path collapse within the same time bucket. Probes that disagree on
/// identity can still double-count, which is the accepted soft failure mode
/// for independent observers.
pub fn transfer_identity(observation: &TransferObservation) -> String {
    if let Some(object_id) = observation.object_id.as_deref() {
        let action = observation.action.as_deref().unwrap_or("read");
        return format!("obj:{object_id}:{action}");
    }

    let path = observation
        .path
        .as_deref()
        .map(normalize_path)
        .unwrap_or_else(|| "-".to_string());
    let bucket = observation.observed_at.timestamp() / SIGNATURE_BUCKET_SECS;

    format!("sig:{}:{}:{}", observation.account_id, path, bucket)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn observation(probe: ProbeKind) -> TransferObservation {
        TransferObservation {
            probe,
            account_id: "alice".to_string(),
            bytes: 1024,
            object_id: None,
            action: None,
            path: None,
            observed_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap(),
        }
    }

    #[test]
    fn object_identity_ignores_probe_kind() {
        let mut a = observation(ProbeKind::NodeRead);
        a.object_id = Some("4711".to_string());
        a.action = Some("read".to_string());

        let mut b = observation(ProbeKind::WebdavGet);
        b.object_id = Some("4711".to_string());
        b.action = Some("read".to_string());

        assert_eq!(transfer_identity(&a), transfer_identity(&b));
    }

    #[test]
    fn signature_identity_groups_same_minute() {
        let mut a = observation(ProbeKind::Middleware);
        a.path = Some("/photos/cat.jpg".to_string());

        let mut b = observation(ProbeKind::ShareLink);
        b.path = Some("photos/cat.jpg/".to_string());
        b.observed_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 59).unwrap();

        assert_eq!(transfer_identity(&a), transfer_identity(&b));
    }

    #[test]
    fn signature_identity_splits_across_buckets() {
        let mut a = observation(ProbeKind::Middleware);
        a.path = Some("/photos/cat.jpg".to_string());
        a.observed_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 59).unwrap();

        let mut b = a.clone();
        b.observed_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 1, 1).unwrap();

        assert_ne!(transfer_identity(&a), transfer_identity(&b));
    }

    #[test]
    fn signature_identity_separates_accounts() {
        let mut a = observation(ProbeKind::Middleware);
        a.path = Some("/doc.pdf".to_string());

        let mut b = a.clone();
        b.account_id = "bob".to_string();

        assert_ne!(transfer_identity(&a), transfer_identity(&b));
    }
}
