use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub warning_threshold_pct: u8,
    pub critical_threshold_pct: u8,
    pub dedup_window_secs: u64,
    pub dedup_max_entries: usize,
    pub suppression_ttl_secs: u64,
    pub average_file_size_bytes: i64,
    pub aggregation_interval_secs: u64,
    pub reset_check_interval_secs: u64,
    pub mail_gateway_url: Option<String>,
    pub notification_sink_url: Option<String>,
    pub transport_timeout_secs: u64,
    pub accounts_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8184,
            data_dir: PathBuf::from("data/quota-monitor"),
            warning_threshold_pct: 80,
            critical_threshold_pct: 95,
            dedup_window_secs: 300,
            dedup_max_entries: 10_000,
            suppression_ttl_secs: 300,
            average_file_size_bytes: 2 * 1024 * 1024,
            aggregation_interval_secs: 300,
            reset_check_interval_secs: 24 * 60 * 60,
            mail_gateway_url: None,
            notification_sink_url: None,
            transport_timeout_secs: 10,
            accounts_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("QUOTA_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("QUOTA_PORT") {
            cfg.server_port = port.parse().context("QUOTA_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("QUOTA_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(pct) = env::var("WARNING_THRESHOLD_PCT") {
            cfg.warning_threshold_pct = pct
                .parse()
                .context("WARNING_THRESHOLD_PCT must be a percentage")?;
        }
        if let Ok(pct) = env::var("CRITICAL_THRESHOLD_PCT") {
            cfg.critical_threshold_pct = pct
                .parse()
                .context("CRITICAL_THRESHOLD_PCT must be a percentage")?;
        }
        if let Ok(window) = env::var("DEDUP_WINDOW_SECS") {
            cfg.dedup_window_secs = window
                .parse()
                .context("DEDUP_WINDOW_SECS must be a positive integer")?;
        }
        if let Ok(cap) = env::var("DEDUP_MAX_ENTRIES") {
            cfg.dedup_max_entries = cap
                .parse()
                .context("DEDUP_MAX_ENTRIES must be a positive integer")?;
        }
        if let Ok(ttl) = env::var("SUPPRESSION_TTL_SECS") {
            cfg.suppression_ttl_secs = ttl
                .parse()
                .context("SUPPRESSION_TTL_SECS must be a positive integer")?;
        }
        if let Ok(size) = env::var("AVERAGE_FILE_SIZE_BYTES") {
            cfg.average_file_size_bytes = size
                .parse()
                .context("AVERAGE_FILE_SIZE_BYTES must be a positive integer")?;
        }
        if let Ok(interval) = env::var("AGGREGATION_INTERVAL_SECS") {
            cfg.aggregation_interval_secs = interval
                .parse()
                .context("AGGREGATION_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(interval) = env::var("RESET_CHECK_INTERVAL_SECS") {
            cfg.reset_check_interval_secs = interval
                .parse()
                .context("RESET_CHECK_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(url) = env::var("MAIL_GATEWAY_URL") {
            cfg.mail_gateway_url = Some(url);
        }
        if let Ok(url) = env::var("NOTIFICATION_SINK_URL") {
            cfg.notification_sink_url = Some(url);
        }
        if let Ok(timeout) = env::var("TRANSPORT_TIMEOUT_SECS") {
            cfg.transport_timeout_secs = timeout
                .parse()
                .context("TRANSPORT_TIMEOUT_SECS must be a positive integer")?;
        }
        if let Ok(path) = env::var("ACCOUNTS_FILE") {
            cfg.accounts_file = Some(PathBuf::from(path));
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.warning_threshold_pct == 0 || self.warning_threshold_pct > 100 {
            anyhow::bail!("WARNING_THRESHOLD_PCT must be between 1 and 100");
        }
        if self.critical_threshold_pct == 0 || self.critical_threshold_pct > 100 {
            anyhow::bail!("CRITICAL_THRESHOLD_PCT must be between 1 and 100");
        }
        if self.warning_threshold_pct > self.critical_threshold_pct {
            anyhow::bail!("WARNING_THRESHOLD_PCT must not exceed CRITICAL_THRESHOLD_PCT");
        }
        if self.dedup_window_secs == 0 {
            anyhow::bail!("DEDUP_WINDOW_SECS must be greater than zero");
        }
        if self.dedup_max_entries == 0 {
            anyhow::bail!("DEDUP_MAX_ENTRIES must be greater than zero");
        }
        if self.average_file_size_bytes <= 0 {
            anyhow::bail!("AVERAGE_FILE_SIZE_BYTES must be greater than zero");
        }
        if self.aggregation_interval_secs == 0 {
            anyhow::bail!("AGGREGATION_INTERVAL_SECS must be greater than zero");
        }
        if self.reset_check_interval_secs == 0 {
            anyhow::bail!("RESET_CHECK_INTERVAL_SECS must be greater than zero");
        }

        Ok(())
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}
