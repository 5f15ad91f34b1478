//! Object store boundary and journal storage.
//!
//! The cloud store is an external collaborator. This crate defines the
//! trait the ETL consumes, a filesystem-backed implementation (used in
//! deployments that mount the store locally, and in all tests), and the
//! append-only journal for tabular pipeline output.

pub mod config;
pub mod journal;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use etl_core::Result;

pub use config::StoreConfig;
pub use journal::Journal;
pub use local::LocalFsStore;

/// The object-store operations the ETL consumes.
///
/// `list` re-lists current state on every call; callers must tolerate the
/// result set changing between calls.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of objects in `container` whose names end with `suffix`.
    async fn list(&self, container: &str, suffix: &str) -> Result<Vec<String>>;

    /// Download `name` from `container` to the local path `dest`.
    async fn download(&self, container: &str, name: &str, dest: &Path) -> Result<()>;

    /// Upload the local file `src` into `container` under `name`,
    /// replacing any existing object of that name.
    async fn upload(&self, container: &str, src: &Path, name: &str) -> Result<()>;
}
