use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use transfer_quota_monitor::api::{self, ApiState};
use transfer_quota_monitor::config::MonitorConfig;
use transfer_quota_monitor::ingest::{DedupLayer, IngestPipeline};
use transfer_quota_monitor::jobs::{AggregationJob, MonthlyResetJob};
use transfer_quota_monitor::ledger::{Thresholds, TransferLedger};
use transfer_quota_monitor::notify::{
    AccountDirectory, EmailTransport, HttpMailer, HttpNotificationSink, LogOnlyMailer,
    LogOnlySink, NotificationDispatcher, NotificationSink, StaticAccountDirectory,
    SuppressionCache,
};
use transfer_quota_monitor::storage::QuotaDatabase;

#[tokio::main]
async fn main() -> Result<()> {
    let config = MonitorConfig::from_env()?;
    init_tracing(&config.log_level)?;
    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        data_dir = %config.data_dir.display(),
        "starting transfer quota monitor"
    );

    let storage = Arc::new(QuotaDatabase::new(config.data_dir.clone())?);

    let directory: Arc<dyn AccountDirectory> = match &config.accounts_file {
        Some(path) => Arc::new(
            StaticAccountDirectory::load_from_file(path)
                .with_context(|| format!("unable to load accounts from {}", path.display()))?,
        ),
        None => {
            warn!("no accounts file configured, notifications will find no recipients");
            Arc::new(StaticAccountDirectory::empty())
        }
    };

    let sink: Arc<dyn NotificationSink> = match &config.notification_sink_url {
        Some(url) => Arc::new(HttpNotificationSink::new(
            url.clone(),
            config.transport_timeout_secs,
        )?),
        None => Arc::new(LogOnlySink),
    };
    let mailer: Arc<dyn EmailTransport> = match &config.mail_gateway_url {
        Some(url) => Arc::new(HttpMailer::new(url.clone(), config.transport_timeout_secs)?),
        None => Arc::new(LogOnlyMailer),
    };

    let suppression = SuppressionCache::new(Duration::from_secs(config.suppression_ttl_secs));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        sink,
        mailer,
        directory,
        suppression,
    ));

    let ledger = Arc::new(TransferLedger::new(
        Arc::clone(&storage),
        dispatcher,
        Thresholds {
            warning_pct: config.warning_threshold_pct,
            critical_pct: config.critical_threshold_pct,
        },
    )?);

    let dedup = DedupLayer::new(
        Arc::clone(&storage),
        config.dedup_window_secs,
        config.dedup_max_entries,
    );
    let pipeline = Arc::new(IngestPipeline::new(dedup, Arc::clone(&ledger)));

    let aggregation = Arc::new(AggregationJob::new(
        Arc::clone(&storage),
        Arc::clone(&ledger),
        config.average_file_size_bytes,
        Duration::from_secs(config.aggregation_interval_secs),
    ));
    let _aggregation_task = Arc::clone(&aggregation).spawn();

    let monthly_reset = Arc::new(MonthlyResetJob::new(
        Arc::clone(&storage),
        Arc::clone(&ledger),
        Duration::from_secs(config.reset_check_interval_secs),
    ));
    let _reset_task = monthly_reset.spawn();

    let state = Arc::new(ApiState::new(ledger, pipeline, aggregation, storage));
    let router = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("transfer quota monitor shutting down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).try_init().map_err(|err| {
        anyhow::anyhow!("unable to initialize tracing subscriber: {err}")
    })?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
