//! Shared mocks, fixtures, and setup for the integration tests.

pub mod fixtures;
pub mod mocks;
