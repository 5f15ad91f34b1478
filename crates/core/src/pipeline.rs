//! The per-stream processing seam.
//!
//! Pipelines are external collaborators: one pipeline per stream type,
//! looked up by the registry when it first sees a stream. The ETL core
//! only defines the trait and the shape of pipeline output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::naming::StreamKey;

/// One structured output row produced by a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// When the underlying sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Pipeline-defined payload.
    pub fields: serde_json::Value,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, fields: serde_json::Value) -> Self {
        Self { timestamp, fields }
    }
}

/// What a pipeline produced for one input file.
#[derive(Debug)]
pub enum PipelineOutput {
    /// A non-tabular artifact to be archived as a whole file.
    Artifact(PathBuf),
    /// Tabular records destined for the per-day, per-stream journal.
    Records(Vec<Record>),
    /// The file was consumed without producing archivable output.
    Nothing,
}

/// Per-stream-type processing logic.
///
/// Implementations transform one raw input file into archivable output.
/// They must be cancel-safe at file granularity: the worker never drops
/// an in-flight `process` call, but may stop between files.
#[async_trait]
pub trait StreamPipeline: Send + Sync {
    async fn process(&self, file: &Path) -> Result<PipelineOutput>;
}

/// Builds the pipeline for a newly observed stream.
///
/// Called by the registry exactly once per distinct stream prefix per run.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn build(&self, key: &StreamKey) -> Result<Arc<dyn StreamPipeline>>;
}
