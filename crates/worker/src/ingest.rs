//! Archive ingest worker.
//!
//! Downloads one bounded batch of uploaded archives and extracts each
//! into the flat processing directory, one archive at a time, so
//! downstream stream workers see files incrementally instead of after a
//! full batch download.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cloud_store::ObjectStore;
use etl_core::{Error, IngestReport, Result};
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::shutdown::Shutdown;

/// Ingest worker configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Container holding uploaded archives.
    pub container: String,
    /// Suffix filter for archives (e.g. ".zip").
    pub archive_suffix: String,
    /// Where archives are downloaded before extraction.
    pub staging_dir: PathBuf,
    /// The flat directory extracted files land in, shared with the
    /// stream workers.
    pub processing_dir: PathBuf,
    /// Cap on archives per batch; bounds worker/thread/network fan-out.
    pub max_archives_per_batch: usize,
    /// Retries per store operation before skipping the archive.
    pub max_retries: u32,
    /// Backoff between retries (linear).
    pub retry_backoff: Duration,
    /// Deadline for a single store operation.
    pub op_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            container: "upload".to_string(),
            archive_suffix: ".zip".to_string(),
            staging_dir: PathBuf::from("/var/lib/sensor-etl/staging"),
            processing_dir: PathBuf::from("/var/lib/sensor-etl/processing"),
            max_archives_per_batch: 50,
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
            op_timeout: Duration::from_secs(60),
        }
    }
}

/// Worker that drains one batch of uploaded archives into the
/// processing directory.
pub struct ArchiveIngestWorker {
    store: Arc<dyn ObjectStore>,
    config: IngestConfig,
    shutdown: Shutdown,
}

impl ArchiveIngestWorker {
    pub fn new(store: Arc<dyn ObjectStore>, config: IngestConfig, shutdown: Shutdown) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    /// Run one ingest batch: list, then download + extract each archive
    /// strictly in order.
    ///
    /// `exclude` holds archives already attempted earlier in this run;
    /// the store owns archive deletion, so they stay listed. Transient
    /// failures skip the archive (the next scheduled run retries it); a
    /// structural violation of the flat-directory invariant aborts the
    /// batch.
    pub async fn run(&self, exclude: &HashSet<String>) -> Result<IngestReport> {
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;
        tokio::fs::create_dir_all(&self.config.processing_dir).await?;

        let pending = self.list_with_retry().await?;
        let batch: Vec<&String> = pending
            .iter()
            .filter(|name| !exclude.contains(*name))
            .take(self.config.max_archives_per_batch)
            .collect();

        info!(
            pending = pending.len(),
            batch = batch.len(),
            cap = self.config.max_archives_per_batch,
            "Ingest batch starting"
        );

        let mut report = IngestReport::default();

        for name in batch {
            if self.shutdown.is_cancelled() {
                info!("Ingest cancelled, stopping before {name}");
                break;
            }

            match self.ingest_one(name).await {
                Ok(extracted) => {
                    debug!(archive = %name, files = extracted, "Archive ingested");
                    report.ingested.push(name.clone());
                }
                Err(e) if e.is_fatal() => {
                    error!(archive = %name, error = %e, "Fatal ingest error, aborting batch");
                    return Err(e);
                }
                Err(e) => {
                    warn!(archive = %name, error = %e, "Skipping archive");
                    report.skip(name, e);
                }
            }
        }

        info!(
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            "Ingest batch finished"
        );
        Ok(report)
    }

    /// Download one archive to staging and extract it, then verify the
    /// processing directory is still flat.
    async fn ingest_one(&self, name: &str) -> Result<usize> {
        let staged = self.config.staging_dir.join(name);
        self.download_with_retry(name, &staged).await?;

        let processing_dir = self.config.processing_dir.clone();
        let archive_name = name.to_string();
        let staged_for_task = staged.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_flat(&staged_for_task, &processing_dir, &archive_name)
        })
        .await
        .map_err(|e| Error::Join(e.to_string()))??;

        assert_flat(&self.config.processing_dir).await?;

        // Staged copy is no longer needed once extraction succeeded.
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "Failed to remove staged archive");
        }

        Ok(extracted)
    }

    async fn list_with_retry(&self) -> Result<Vec<String>> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * attempt;
                warn!(attempt, backoff_ms = %backoff.as_millis(), "Retrying archive listing");
                tokio::time::sleep(backoff).await;
            }

            match self.with_timeout("list", async {
                self.store
                    .list(&self.config.container, &self.config.archive_suffix)
                    .await
            })
            .await
            {
                Ok(names) => return Ok(names),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::store("listing failed with unknown error")))
    }

    async fn download_with_retry(&self, name: &str, dest: &Path) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * attempt;
                warn!(
                    archive = name,
                    attempt,
                    backoff_ms = %backoff.as_millis(),
                    "Retrying download"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.with_timeout("download", async {
                self.store
                    .download(&self.config.container, name, dest)
                    .await
            })
            .await
            {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::store(format!("download of {name} failed"))))
    }

    async fn with_timeout<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.op_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.config.op_timeout, op.to_string()))?
    }
}

/// Extract `archive` into `dest`, rejecting anything that would break
/// the flat-directory invariant.
///
/// Filenames alone encode stream identity, so a subdirectory inside the
/// processing area is a structural error, not a recoverable one.
fn extract_flat(archive: &Path, dest: &Path, archive_name: &str) -> Result<usize> {
    let file = std::fs::File::open(archive)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| Error::archive(archive_name, format!("not a readable zip: {e}")))?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::archive(archive_name, format!("bad entry {i}: {e}")))?;

        if entry.is_dir() {
            return Err(Error::structural(format!(
                "archive {archive_name} contains directory entry {:?}",
                entry.name()
            )));
        }
        let entry_name = entry.name().to_string();
        if entry_name.contains('/') || entry_name.contains('\\') {
            return Err(Error::structural(format!(
                "archive {archive_name} contains nested path {entry_name:?}"
            )));
        }

        let out_path = dest.join(&entry_name);
        let mut out = std::fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::archive(archive_name, format!("extracting {entry_name}: {e}")))?;
        extracted += 1;
    }

    Ok(extracted)
}

/// Assert the processing directory contains no directories.
async fn assert_flat(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            return Err(Error::structural(format!(
                "directory {:?} found in processing area {}",
                entry.file_name(),
                dir.display()
            )));
        }
    }
    Ok(())
}
