//! Core types, naming convention, and errors for the sensor ETL.

pub mod error;
pub mod naming;
pub mod pipeline;
pub mod report;

pub use error::{Error, Result};
pub use naming::*;
pub use pipeline::*;
pub use report::*;
