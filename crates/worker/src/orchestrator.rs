//! ETL orchestrator: sequences ingest batches and the final aggregation.
//!
//! State machine:
//!
//! ```text
//! Idle → IngestingBatch → DrainingBatch → (repeat while pending) → Aggregating → Done
//! ```
//!
//! Batches never overlap: the registry of batch n is fully stopped and
//! joined before batch n+1 starts. This trades throughput for a simple
//! drain invariant.

use std::collections::HashSet;
use std::sync::Arc;

use cloud_store::ObjectStore;
use etl_core::{Error, EtlSummary, PipelineFactory, Result};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::aggregate::{AggregationWindow, Aggregator, RollupStrategy};
use crate::ingest::{ArchiveIngestWorker, IngestConfig};
use crate::registry::{RegistryConfig, StreamRegistry};
use crate::shutdown::Shutdown;
use crate::stream::OutputArchiver;

/// Orchestrator state, exposed for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtlState {
    Idle,
    IngestingBatch,
    DrainingBatch,
    Aggregating,
    Done,
}

impl std::fmt::Display for EtlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::IngestingBatch => "ingesting-batch",
            Self::DrainingBatch => "draining-batch",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Full ETL run configuration.
#[derive(Debug, Clone, Default)]
pub struct EtlConfig {
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,
    /// Windows the aggregation pass rolls up, in order.
    pub windows: Vec<AggregationWindow>,
}

/// Drives one complete ETL run to completion.
pub struct EtlOrchestrator {
    store: Arc<dyn ObjectStore>,
    factory: Arc<dyn PipelineFactory>,
    archiver: Arc<OutputArchiver>,
    rollup: Option<Arc<dyn RollupStrategy>>,
    config: EtlConfig,
    shutdown: Shutdown,
    state: Mutex<EtlState>,
}

impl EtlOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        factory: Arc<dyn PipelineFactory>,
        archiver: Arc<OutputArchiver>,
        rollup: Option<Arc<dyn RollupStrategy>>,
        config: EtlConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            factory,
            archiver,
            rollup,
            config,
            shutdown,
            state: Mutex::new(EtlState::Idle),
        }
    }

    pub fn state(&self) -> EtlState {
        *self.state.lock()
    }

    fn set_state(&self, state: EtlState) {
        info!(%state, "Orchestrator state change");
        *self.state.lock() = state;
    }

    /// Run to completion: drain all pending archives in bounded batches,
    /// then aggregate once.
    ///
    /// Fatal errors propagate; the caller turns them into a non-zero
    /// exit so the external scheduler can alert. Skipped archives are
    /// reported in the summary but do not block aggregation.
    pub async fn run(&self) -> Result<EtlSummary> {
        let mut summary = EtlSummary::default();
        // Archives attempted in this run. The store owns deletion, so
        // processed archives stay listed; without this the drain check
        // would never see an empty backlog.
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            if self.shutdown.is_cancelled() {
                warn!("Run cancelled before batch {}", summary.batches + 1);
                return Ok(summary);
            }

            summary.batches += 1;
            self.set_state(EtlState::IngestingBatch);

            // The registry starts alongside ingest so stream workers pick
            // up files while later archives are still downloading.
            let registry = StreamRegistry::start(
                self.config.registry.clone(),
                self.factory.clone(),
                self.archiver.clone(),
                self.shutdown.child(),
            );

            let ingest = ArchiveIngestWorker::new(
                self.store.clone(),
                self.config.ingest.clone(),
                self.shutdown.child(),
            );
            let exclude = attempted.clone();
            let ingest_task =
                tokio::spawn(async move { ingest.run(&exclude).await });

            let report = match ingest_task.await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(batch = summary.batches, error = %e, "Ingest failed, aborting run");
                    registry.stop();
                    if let Err(join_err) = registry.join().await {
                        warn!(error = %join_err, "Registry join failed during abort");
                    }
                    return Err(e);
                }
                Err(e) => {
                    registry.stop();
                    let _ = registry.join().await;
                    return Err(Error::Join(format!("ingest task: {e}")));
                }
            };

            for name in &report.ingested {
                attempted.insert(name.clone());
            }
            for skipped in &report.skipped {
                attempted.insert(skipped.name.clone());
            }
            summary.archives_ingested += report.ingested.len();
            summary.archives_skipped += report.skipped.len();
            if report.is_partial() {
                warn!(
                    batch = summary.batches,
                    skipped = report.skipped.len(),
                    "Batch completed with skipped archives"
                );
            }

            // Drain: this batch's files must be fully processed before
            // the next batch starts.
            self.set_state(EtlState::DrainingBatch);
            registry.stop();
            summary.streams_seen += registry.spawned_count();
            registry.join().await?;

            let pending = self.pending_archives(&attempted).await?;
            if pending == 0 {
                break;
            }
            info!(pending, "More archives pending, starting next batch");
        }

        self.set_state(EtlState::Aggregating);
        let mut aggregator = Aggregator::new(self.rollup.clone(), self.config.windows.clone());
        aggregator.start();
        let rollup_summary = aggregator.join().await?;
        summary.aggregated = true;

        self.set_state(EtlState::Done);
        info!(
            batches = summary.batches,
            ingested = summary.archives_ingested,
            skipped = summary.archives_skipped,
            streams = summary.streams_seen,
            rollup_rows = rollup_summary.rows_written,
            "ETL run complete"
        );
        Ok(summary)
    }

    /// Count of uploaded archives not yet attempted in this run.
    async fn pending_archives(&self, attempted: &HashSet<String>) -> Result<usize> {
        let names = self
            .store
            .list(&self.config.ingest.container, &self.config.ingest.archive_suffix)
            .await?;
        Ok(names
            .iter()
            .filter(|name| !attempted.contains(*name))
            .count())
    }
}
