//! Typed results surfaced by the workers.
//!
//! The orchestrator decides continue/abort from these instead of polling
//! thread liveness.

use serde::{Deserialize, Serialize};

/// Why an archive was skipped during ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedArchive {
    pub name: String,
    pub reason: String,
}

/// Outcome of one ingest batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    /// Archives downloaded and extracted in this batch, in order.
    pub ingested: Vec<String>,
    /// Archives skipped after retries; retried by the next scheduled run.
    pub skipped: Vec<SkippedArchive>,
}

impl IngestReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn skip(&mut self, name: impl Into<String>, reason: impl ToString) {
        self.skipped.push(SkippedArchive {
            name: name.into(),
            reason: reason.to_string(),
        });
    }
}

/// Outcome of a whole ETL run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlSummary {
    /// Number of ingest batches performed.
    pub batches: usize,
    /// Total archives ingested across all batches.
    pub archives_ingested: usize,
    /// Total archives skipped across all batches.
    pub archives_skipped: usize,
    /// Distinct stream workers spawned across all batches.
    pub streams_seen: usize,
    /// Whether the aggregation pass ran.
    pub aggregated: bool,
}
