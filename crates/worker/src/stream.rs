//! Per-stream polling worker.
//!
//! One worker per distinct stream prefix. It repeatedly scans the shared
//! processing directory for files belonging to its stream, runs them
//! through the stream's pipeline, archives the output, and only then
//! deletes the input file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cloud_store::{Journal, ObjectStore};
use etl_core::{Error, PipelineOutput, Result, StreamKey, StreamPipeline};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;

/// Stream worker configuration.
#[derive(Debug, Clone)]
pub struct StreamWorkerConfig {
    /// The shared flat processing directory.
    pub processing_dir: PathBuf,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Files modified more recently than this are assumed to still be
    /// written to and are skipped until a later cycle.
    pub quiet_period: Duration,
}

impl Default for StreamWorkerConfig {
    fn default() -> Self {
        Self {
            processing_dir: PathBuf::from("/var/lib/sensor-etl/processing"),
            poll_interval: Duration::from_secs(5),
            quiet_period: Duration::from_secs(2),
        }
    }
}

/// Archives pipeline output: whole files to the artifact container,
/// records to the per-day per-stream journal.
pub struct OutputArchiver {
    store: Arc<dyn ObjectStore>,
    artifact_container: String,
    journal: Journal,
}

impl OutputArchiver {
    pub fn new(store: Arc<dyn ObjectStore>, artifact_container: impl Into<String>, journal: Journal) -> Self {
        Self {
            store,
            artifact_container: artifact_container.into(),
            journal,
        }
    }

    /// Archive one pipeline output produced from input file `source`.
    ///
    /// Artifact names derive from the source filename, so re-delivery
    /// overwrites instead of duplicating; journal appends deduplicate on
    /// `source` themselves.
    pub async fn archive(
        &self,
        key: &StreamKey,
        source: &str,
        output: PipelineOutput,
    ) -> Result<()> {
        match output {
            PipelineOutput::Artifact(path) => {
                let name = artifact_name(source, &path);
                self.store
                    .upload(&self.artifact_container, &path, &name)
                    .await?;
                debug!(stream = %key, source, artifact = %name, "Archived artifact");
            }
            PipelineOutput::Records(records) => {
                let written = self.journal.append(key, source, &records).await?;
                debug!(stream = %key, source, records = written, "Journalled records");
            }
            PipelineOutput::Nothing => {
                debug!(stream = %key, source, "Pipeline produced no output");
            }
        }
        Ok(())
    }
}

/// Deterministic artifact name for the output of `source`.
fn artifact_name(source: &str, artifact: &Path) -> String {
    match artifact.extension() {
        Some(ext) if !source.ends_with(&format!(".{}", ext.to_string_lossy())) => {
            format!("{source}.{}", ext.to_string_lossy())
        }
        _ => source.to_string(),
    }
}

/// Worker that processes all files of one stream.
pub struct StreamWorker {
    key: StreamKey,
    prefix: String,
    pipeline: Arc<dyn StreamPipeline>,
    archiver: Arc<OutputArchiver>,
    config: StreamWorkerConfig,
    shutdown: Shutdown,
}

/// Owned handle to a started stream worker.
pub struct StreamHandle {
    key: StreamKey,
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl StreamHandle {
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Request graceful shutdown; in-flight file processing completes.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the worker task to finish.
    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| Error::Join(format!("stream worker {}: {e}", self.key)))
    }
}

impl StreamWorker {
    pub fn new(
        key: StreamKey,
        pipeline: Arc<dyn StreamPipeline>,
        archiver: Arc<OutputArchiver>,
        config: StreamWorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let prefix = key.prefix();
        Self {
            key,
            prefix,
            pipeline,
            archiver,
            config,
            shutdown,
        }
    }

    /// Spawn the poll loop and return its handle.
    pub fn start(self) -> StreamHandle {
        let key = self.key.clone();
        let shutdown = self.shutdown.clone();
        info!(stream = %key, "Starting stream worker");
        let handle = tokio::spawn(self.run());
        StreamHandle {
            key,
            shutdown,
            handle,
        }
    }

    async fn run(self) {
        loop {
            self.drain(false).await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        // Final drain: the orchestrator treats registry stop+join as the
        // "batch fully processed" checkpoint, so leftover files of this
        // stream must be handled before the task exits. Nothing writes to
        // the processing area at this point, so the quiet period is
        // waived.
        self.drain(true).await;
        info!(stream = %self.key, "Stream worker stopped");
    }

    /// Process every stable file of this stream currently visible.
    ///
    /// Per-file failures are logged and the file stays in place for a
    /// later cycle; they never kill the worker.
    async fn drain(&self, ignore_quiet_period: bool) {
        let files = match self.stable_files(ignore_quiet_period).await {
            Ok(files) => files,
            Err(e) => {
                warn!(stream = %self.key, error = %e, "Failed to scan processing directory");
                return;
            }
        };

        for path in files {
            if let Err(e) = self.process_file(&path).await {
                warn!(
                    stream = %self.key,
                    file = %path.display(),
                    error = %e,
                    "Failed to process file, will retry next cycle"
                );
            }
        }
    }

    /// Files in the processing directory belonging to this stream, not
    /// modified within the quiet period, in name order.
    async fn stable_files(&self, ignore_quiet_period: bool) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.processing_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.prefix) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if !ignore_quiet_period {
                let modified = entry.metadata().await?.modified()?;
                match modified.elapsed() {
                    Ok(age) if age < self.config.quiet_period => continue,
                    // Clock skew puts mtime in the future; treat as quiet.
                    Err(_) => continue,
                    Ok(_) => {}
                }
            }
            files.push(entry.path());
        }

        files.sort();
        Ok(files)
    }

    async fn process_file(&self, path: &Path) -> Result<()> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::pipeline(path, "no file name"))?;

        let output = self.pipeline.process(path).await?;
        let artifact_path = match &output {
            PipelineOutput::Artifact(p) => Some(p.clone()),
            _ => None,
        };
        self.archiver.archive(&self.key, &source, output).await?;

        // Input is consumed only after its output is safely archived.
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Clean up a pipeline-written artifact that wasn't the input itself.
        if let Some(artifact) = artifact_path {
            if artifact != *path && artifact.exists() {
                if let Err(e) = tokio::fs::remove_file(&artifact).await {
                    warn!(path = %artifact.display(), error = %e, "Failed to remove artifact temp");
                }
            }
        }

        debug!(stream = %self.key, source, "File processed and archived");
        Ok(())
    }
}
