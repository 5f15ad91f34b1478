//! Store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the object store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root path for the filesystem-backed store; containers are
    /// subdirectories of this path.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Container devices upload archives into.
    #[serde(default = "default_upload_container")]
    pub upload_container: String,

    /// Container whole-file pipeline artifacts are archived into.
    #[serde(default = "default_artifact_container")]
    pub artifact_container: String,

    /// Suffix filter for pending archives.
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/sensor-etl/store")
}

fn default_upload_container() -> String {
    "upload".to_string()
}

fn default_artifact_container() -> String {
    "artifacts".to_string()
}

fn default_archive_suffix() -> String {
    ".zip".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            upload_container: default_upload_container(),
            artifact_container: default_artifact_container(),
            archive_suffix: default_archive_suffix(),
        }
    }
}
