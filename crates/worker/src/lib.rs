//! Workers for the sensor ETL batch job.
//!
//! - Ingest: download + extract one bounded batch of uploaded archives
//! - Stream: per-stream polling worker feeding the processing pipeline
//! - Registry: discovers streams and owns worker lifecycles
//! - Aggregate: post-ingestion rollup pass (contract stub)
//! - Orchestrator: sequences batches and the final aggregation

pub mod aggregate;
pub mod ingest;
pub mod orchestrator;
pub mod registry;
pub mod shutdown;
pub mod stream;

pub use aggregate::{AggregationWindow, Aggregator, RollupStrategy, RollupSummary};
pub use ingest::{ArchiveIngestWorker, IngestConfig};
pub use orchestrator::{EtlConfig, EtlOrchestrator, EtlState};
pub use registry::{RegistryConfig, StreamRegistry};
pub use shutdown::Shutdown;
pub use stream::{OutputArchiver, StreamHandle, StreamWorker, StreamWorkerConfig};
