//! Filesystem-backed object store.
//!
//! Containers map to subdirectories of a root path. Uploads are staged
//! through a temp name and renamed into place so readers never observe a
//! half-written object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use etl_core::{Error, Result};
use tracing::debug;

use crate::ObjectStore;

/// Object store over a local (or mounted) directory tree.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        // Object names are flat; anything that would escape the
        // container directory is rejected.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::store(format!("invalid object name {name:?}")));
        }
        Ok(self.container_dir(container).join(name))
    }
}

#[async_trait]
impl ObjectStore for LocalFsStore {
    async fn list(&self, container: &str, suffix: &str) -> Result<Vec<String>> {
        let dir = self.container_dir(container);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::store(format!("list {container}: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::store(format!("list {container}: {e}")))?
        {
            if !entry
                .file_type()
                .await
                .map_err(|e| Error::store(format!("stat in {container}: {e}")))?
                .is_file()
            {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(suffix) {
                names.push(name);
            }
        }

        // Deterministic order: device uploads embed timestamps in names,
        // so lexicographic is roughly chronological.
        names.sort();
        debug!(container, suffix, count = names.len(), "Listed objects");
        Ok(names)
    }

    async fn download(&self, container: &str, name: &str, dest: &Path) -> Result<()> {
        let src = self.object_path(container, name)?;
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| Error::store(format!("download {container}/{name}: {e}")))?;
        debug!(container, name, dest = %dest.display(), "Downloaded object");
        Ok(())
    }

    async fn upload(&self, container: &str, src: &Path, name: &str) -> Result<()> {
        let dest = self.object_path(container, name)?;
        let dir = self.container_dir(container);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::store(format!("create container {container}: {e}")))?;

        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::copy(src, &tmp)
            .await
            .map_err(|e| Error::store(format!("upload {container}/{name}: {e}")))?;
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| Error::store(format!("upload {container}/{name}: {e}")))?;
        debug!(container, name, "Uploaded object");
        Ok(())
    }
}
