//! Stream registry: discovers streams and owns worker lifecycles.
//!
//! A recurring scan maps files in the processing directory to stream
//! prefixes and lazily spawns exactly one stream worker per new prefix.
//! The prefix→worker map is the single source of truth for which streams
//! are live; all access goes through one mutex. Map writes happen only on
//! the scan task, so check-then-insert across the pipeline-build await
//! point cannot race with another writer; the lock exists for `stop` and
//! `join` running concurrently with a scan.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use etl_core::{raw_prefix, Error, PipelineFactory, Result, StreamKey};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;
use crate::stream::{OutputArchiver, StreamHandle, StreamWorker, StreamWorkerConfig};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// The shared flat processing directory.
    pub processing_dir: PathBuf,
    /// Delay before the first scan; short, so a fresh batch is picked up
    /// quickly.
    pub initial_scan_delay: Duration,
    /// Steady-state interval between scans.
    pub scan_interval: Duration,
    /// Configuration handed to each spawned stream worker.
    pub worker: StreamWorkerConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            processing_dir: PathBuf::from("/var/lib/sensor-etl/processing"),
            initial_scan_delay: Duration::from_secs(1),
            scan_interval: Duration::from_secs(10),
            worker: StreamWorkerConfig::default(),
        }
    }
}

struct Inner {
    config: RegistryConfig,
    factory: Arc<dyn PipelineFactory>,
    archiver: Arc<OutputArchiver>,
    workers: Mutex<HashMap<String, StreamHandle>>,
    spawned: AtomicUsize,
    shutdown: Shutdown,
}

/// Owns the scan loop and every spawned stream worker.
pub struct StreamRegistry {
    inner: Arc<Inner>,
    scan_task: JoinHandle<()>,
}

impl StreamRegistry {
    /// Construct the registry and immediately schedule its scan loop.
    pub fn start(
        config: RegistryConfig,
        factory: Arc<dyn PipelineFactory>,
        archiver: Arc<OutputArchiver>,
        shutdown: Shutdown,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            factory,
            archiver,
            workers: Mutex::new(HashMap::new()),
            spawned: AtomicUsize::new(0),
            shutdown,
        });

        let scan_inner = inner.clone();
        let scan_task = tokio::spawn(async move {
            scan_loop(scan_inner).await;
        });

        Self { inner, scan_task }
    }

    /// Number of distinct streams spawned so far this run.
    pub fn spawned_count(&self) -> usize {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    /// Number of currently registered workers.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Request shutdown of the scan loop and every registered worker.
    ///
    /// Cooperative: in-flight file processing completes, each worker
    /// drains its remaining files, then exits.
    pub fn stop(&self) {
        info!("Stopping stream registry");
        self.inner.shutdown.cancel();
        for handle in self.inner.workers.lock().values() {
            handle.stop();
        }
    }

    /// Wait until the scan loop and every worker have fully terminated.
    ///
    /// The orchestrator relies on this as the "nothing left in flight"
    /// checkpoint between batches. Returns immediately when no workers
    /// were ever spawned.
    pub async fn join(self) -> Result<()> {
        self.scan_task
            .await
            .map_err(|e| Error::Join(format!("registry scan task: {e}")))?;

        loop {
            let handle = {
                let mut workers = self.inner.workers.lock();
                let prefix = workers.keys().next().cloned();
                prefix.and_then(|p| workers.remove(&p))
            };
            match handle {
                Some(handle) => {
                    let key = handle.key().clone();
                    handle.join().await?;
                    debug!(stream = %key, "Stream worker joined");
                }
                None => break,
            }
        }

        info!("Stream registry joined");
        Ok(())
    }
}

async fn scan_loop(inner: Arc<Inner>) {
    let cancelled_early = tokio::select! {
        _ = inner.shutdown.cancelled() => true,
        _ = tokio::time::sleep(inner.config.initial_scan_delay) => false,
    };

    if !cancelled_early {
        loop {
            if let Err(e) = scan(&inner).await {
                warn!(error = %e, "Registry scan failed");
            }

            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(inner.config.scan_interval) => {}
            }
        }
    }

    // Final scan: ingest can finish (and stop be requested) before the
    // periodic scan saw its last files. Claiming them here makes
    // stop+join mean "every file of this batch has an owner". Workers
    // spawned now are already cancelled and exit after their drain pass.
    if let Err(e) = scan(&inner).await {
        warn!(error = %e, "Final registry scan failed");
    }
}

/// One scan pass: spawn a worker for every prefix not yet registered.
///
/// A known prefix with new files is left alone: the existing worker polls
/// for its own files, the registry does not poll on its behalf.
async fn scan(inner: &Arc<Inner>) -> Result<()> {
    let mut names = Vec::new();
    // The ingest worker creates the processing dir; a scan can win that
    // race at the start of a batch.
    let mut entries = match tokio::fs::read_dir(&inner.config.processing_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    for name in names {
        let prefix = match raw_prefix(&name) {
            Ok(prefix) => prefix.to_string(),
            Err(e) => {
                warn!(file = %name, error = %e, "Ignoring file outside the naming convention");
                continue;
            }
        };

        if inner.workers.lock().contains_key(&prefix) {
            continue;
        }

        let key = match StreamKey::from_filename(&name) {
            Ok(key) => key,
            Err(e) => {
                warn!(file = %name, error = %e, "Ignoring unparseable stream prefix");
                continue;
            }
        };

        let pipeline = match inner.factory.build(&key).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(stream = %key, error = %e, "No pipeline for stream, skipping");
                continue;
            }
        };

        let worker = StreamWorker::new(
            key.clone(),
            pipeline,
            inner.archiver.clone(),
            inner.config.worker.clone(),
            inner.shutdown.child(),
        );

        // Start and register under the lock so stop/join never observe a
        // spawned-but-unregistered worker.
        let mut workers = inner.workers.lock();
        if !workers.contains_key(&prefix) {
            workers.insert(prefix.clone(), worker.start());
            inner.spawned.fetch_add(1, Ordering::Relaxed);
            info!(stream = %key, prefix = %prefix, "Registered new stream");
        }
    }

    Ok(())
}
