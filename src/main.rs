//! Sensor fleet batch ETL.
//!
//! Run-to-completion job, re-invoked periodically by an external
//! scheduler:
//! - drains pending uploaded archives in bounded batches
//! - fans extracted files out to one worker per sensor stream
//! - archives per-stream output (artifacts and journals)
//! - performs one aggregation pass and exits

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tracing::{error, info, warn};

use cloud_store::{Journal, LocalFsStore, StoreConfig};
use etl_core::{PipelineFactory, PipelineOutput, StreamKey, StreamPipeline};
use etl_worker::{
    AggregationWindow, EtlConfig, EtlOrchestrator, IngestConfig, OutputArchiver, RegistryConfig,
    Shutdown, StreamWorkerConfig,
};
use telemetry::init_tracing_from_env;

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    store: StoreConfig,

    /// Local working area; staging/, processing/ and journal/ live here.
    #[serde(default = "default_work_dir")]
    work_dir: PathBuf,

    #[serde(default = "default_batch_cap")]
    max_archives_per_batch: usize,

    #[serde(default = "default_scan_initial_delay_ms")]
    scan_initial_delay_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    scan_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_quiet_period_ms")]
    quiet_period_ms: u64,

    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
    #[serde(default = "default_op_timeout_secs")]
    op_timeout_secs: u64,

    /// Aggregation windows, e.g. ["hourly", "daily"].
    #[serde(default = "default_windows")]
    windows: Vec<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/sensor-etl")
}

fn default_batch_cap() -> usize {
    50
}

fn default_scan_initial_delay_ms() -> u64 {
    1_000
}

fn default_scan_interval_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_quiet_period_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_op_timeout_secs() -> u64 {
    60
}

fn default_windows() -> Vec<String> {
    vec!["hourly".to_string(), "daily".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            work_dir: default_work_dir(),
            max_archives_per_batch: default_batch_cap(),
            scan_initial_delay_ms: default_scan_initial_delay_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            quiet_period_ms: default_quiet_period_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            op_timeout_secs: default_op_timeout_secs(),
            windows: default_windows(),
        }
    }
}

/// Default pipeline until fleet-specific processors are wired in:
/// archives each raw file unchanged as a whole-file artifact.
struct PassthroughPipeline;

#[async_trait]
impl StreamPipeline for PassthroughPipeline {
    async fn process(&self, file: &Path) -> etl_core::Result<PipelineOutput> {
        Ok(PipelineOutput::Artifact(file.to_path_buf()))
    }
}

struct PassthroughFactory;

#[async_trait]
impl PipelineFactory for PassthroughFactory {
    async fn build(&self, key: &StreamKey) -> etl_core::Result<Arc<dyn StreamPipeline>> {
        info!(stream = %key, "Using passthrough pipeline");
        Ok(Arc::new(PassthroughPipeline))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();
    info!("Starting sensor ETL v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let etl_config = build_etl_config(&config)?;
    info!(
        store_root = %config.store.root.display(),
        work_dir = %config.work_dir.display(),
        batch_cap = config.max_archives_per_batch,
        "Loaded configuration"
    );

    let store = Arc::new(LocalFsStore::new(&config.store.root));
    let archiver = Arc::new(OutputArchiver::new(
        store.clone(),
        config.store.artifact_container.clone(),
        Journal::new(config.work_dir.join("journal")),
    ));

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, finishing in-flight work");
        signal_shutdown.cancel();
    });

    let orchestrator = EtlOrchestrator::new(
        store,
        Arc::new(PassthroughFactory),
        archiver,
        None, // rollup strategy: supplied by the adopting deployment
        etl_config,
        shutdown,
    );

    match orchestrator.run().await {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                ingested = summary.archives_ingested,
                skipped = summary.archives_skipped,
                streams = summary.streams_seen,
                "ETL run finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ETL run failed");
            // Non-zero exit so the external scheduler can alert.
            Err(e).context("ETL run failed")
        }
    }
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("ETL")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

fn build_etl_config(config: &Config) -> Result<EtlConfig> {
    let mut windows = Vec::new();
    for window in &config.windows {
        windows.push(match window.as_str() {
            "hourly" => AggregationWindow::Hourly,
            "daily" => AggregationWindow::Daily,
            other => bail!("unknown aggregation window {other:?}"),
        });
    }

    let processing_dir = config.work_dir.join("processing");
    let worker = StreamWorkerConfig {
        processing_dir: processing_dir.clone(),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        quiet_period: Duration::from_millis(config.quiet_period_ms),
    };

    Ok(EtlConfig {
        ingest: IngestConfig {
            container: config.store.upload_container.clone(),
            archive_suffix: config.store.archive_suffix.clone(),
            staging_dir: config.work_dir.join("staging"),
            processing_dir: processing_dir.clone(),
            max_archives_per_batch: config.max_archives_per_batch,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            op_timeout: Duration::from_secs(config.op_timeout_secs),
        },
        registry: RegistryConfig {
            processing_dir,
            initial_scan_delay: Duration::from_millis(config.scan_initial_delay_ms),
            scan_interval: Duration::from_millis(config.scan_interval_ms),
            worker,
        },
        windows,
    })
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            // No signal handler available; rely on the scheduler's kill.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
