//! Mock implementations for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cloud_store::{LocalFsStore, ObjectStore};
use etl_core::{
    Error, PipelineFactory, PipelineOutput, Record, Result, StreamKey, StreamPipeline,
};
use etl_worker::{AggregationWindow, RollupStrategy, RollupSummary};
use parking_lot::Mutex;

/// Pipeline that records every file it is given, keyed by stream.
///
/// Implements the same `StreamPipeline` trait the production workers
/// consume, so tests observe exactly the files each stream worker would
/// hand to a real processor.
#[derive(Clone)]
pub struct RecordingPipeline {
    key: StreamKey,
    state: Arc<RecordingState>,
}

#[derive(Default)]
pub struct RecordingState {
    /// Files processed, per stream prefix.
    files: Mutex<HashMap<String, Vec<String>>>,
}

impl RecordingState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Files processed for `key`, in processing order.
    pub fn files_for(&self, key: &StreamKey) -> Vec<String> {
        self.files
            .lock()
            .get(&key.prefix())
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_files(&self) -> usize {
        self.files.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl StreamPipeline for RecordingPipeline {
    async fn process(&self, file: &Path) -> Result<PipelineOutput> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.state
            .files
            .lock()
            .entry(self.key.prefix())
            .or_default()
            .push(name);

        // Fixed timestamp keeps journal day-keys deterministic.
        Ok(PipelineOutput::Records(vec![Record::new(
            Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap(),
            serde_json::json!({ "stream": self.key.prefix() }),
        )]))
    }
}

/// Factory producing [`RecordingPipeline`]s and counting distinct builds.
pub struct RecordingFactory {
    state: Arc<RecordingState>,
    built: Mutex<Vec<StreamKey>>,
}

impl RecordingFactory {
    pub fn new(state: Arc<RecordingState>) -> Self {
        Self {
            state,
            built: Mutex::new(Vec::new()),
        }
    }

    /// Streams a pipeline was built for, in discovery order.
    pub fn built_keys(&self) -> Vec<StreamKey> {
        self.built.lock().clone()
    }
}

#[async_trait]
impl PipelineFactory for RecordingFactory {
    async fn build(&self, key: &StreamKey) -> Result<Arc<dyn StreamPipeline>> {
        self.built.lock().push(key.clone());
        Ok(Arc::new(RecordingPipeline {
            key: key.clone(),
            state: self.state.clone(),
        }))
    }
}

/// Store wrapper that fails a configured number of downloads before
/// delegating to the real filesystem store.
pub struct FlakyStore {
    inner: Arc<LocalFsStore>,
    download_failures: AtomicUsize,
    downloads_attempted: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<LocalFsStore>, download_failures: usize) -> Self {
        Self {
            inner,
            download_failures: AtomicUsize::new(download_failures),
            downloads_attempted: AtomicUsize::new(0),
        }
    }

    pub fn downloads_attempted(&self) -> usize {
        self.downloads_attempted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn list(&self, container: &str, suffix: &str) -> Result<Vec<String>> {
        self.inner.list(container, suffix).await
    }

    async fn download(&self, container: &str, name: &str, dest: &Path) -> Result<()> {
        self.downloads_attempted.fetch_add(1, Ordering::Relaxed);
        let remaining = self.download_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.download_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(Error::store(format!("injected download failure for {name}")));
        }
        self.inner.download(container, name, dest).await
    }

    async fn upload(&self, container: &str, src: &Path, name: &str) -> Result<()> {
        self.inner.upload(container, src, name).await
    }
}

/// Rollup strategy that counts invocations.
#[derive(Default)]
pub struct CountingRollup {
    calls: Mutex<Vec<AggregationWindow>>,
}

impl CountingRollup {
    pub fn calls(&self) -> Vec<AggregationWindow> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RollupStrategy for CountingRollup {
    async fn rollup(&self, window: AggregationWindow) -> Result<RollupSummary> {
        self.calls.lock().push(window);
        Ok(RollupSummary::default())
    }
}
