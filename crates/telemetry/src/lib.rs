//! Structured logging for the sensor ETL.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, init_tracing_from_env, try_init_tracing, TracingConfig};
