//! Post-ingestion aggregation pass.
//!
//! The rollup algorithm (what constitutes an hourly/daily record, how
//! partial windows at batch boundaries are handled) is owned by the
//! adopting team and plugged in as a [`RollupStrategy`]. This module
//! only fixes the lifecycle contract: the orchestrator starts the
//! aggregator exactly once after all ingest batches have drained and
//! waits for it before the process exits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use etl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Time bucket granularity for rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationWindow {
    Hourly,
    Daily,
}

impl AggregationWindow {
    /// Truncate `ts` to the start of its window.
    pub fn bucket(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let delta = match self {
            Self::Hourly => TimeDelta::hours(1),
            Self::Daily => TimeDelta::days(1),
        };
        // trunc only fails at the edges of chrono's representable range
        ts.duration_trunc(delta).unwrap_or(ts)
    }
}

impl std::fmt::Display for AggregationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
        }
    }
}

/// What one rollup pass produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollupSummary {
    /// Summary rows written per window.
    pub rows_written: usize,
}

/// The pluggable rollup algorithm.
#[async_trait]
pub trait RollupStrategy: Send + Sync {
    async fn rollup(&self, window: AggregationWindow) -> Result<RollupSummary>;
}

/// Runs the configured rollup strategy once over the configured windows.
pub struct Aggregator {
    strategy: Option<Arc<dyn RollupStrategy>>,
    windows: Vec<AggregationWindow>,
    task: Option<JoinHandle<Result<RollupSummary>>>,
}

impl Aggregator {
    pub fn new(strategy: Option<Arc<dyn RollupStrategy>>, windows: Vec<AggregationWindow>) -> Self {
        Self {
            strategy,
            windows,
            task: None,
        }
    }

    /// Start the single aggregation pass. Idempotent: a second call is a
    /// logged no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("Aggregator already started");
            return;
        }

        let strategy = self.strategy.clone();
        let windows = self.windows.clone();
        self.task = Some(tokio::spawn(async move {
            let Some(strategy) = strategy else {
                info!("No rollup strategy configured, skipping aggregation");
                return Ok(RollupSummary::default());
            };

            let mut total = RollupSummary::default();
            for window in windows {
                info!(%window, "Running rollup");
                let summary = strategy.rollup(window).await?;
                total.rows_written += summary.rows_written;
            }
            Ok(total)
        }));
    }

    /// Wait for the pass to finish and return its result.
    pub async fn join(self) -> Result<RollupSummary> {
        match self.task {
            Some(task) => task
                .await
                .map_err(|e| Error::Join(format!("aggregator: {e}")))?,
            None => Err(Error::Join("aggregator was never started".to_string())),
        }
    }
}
