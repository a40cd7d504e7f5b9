//! Filesystem cache backend

use super::backend::{CacheBackend, CachedArtifact};
use super::key::{CacheKey, CACHE_FORMAT_VERSION};
use crate::error::{AccelError, AccelResult};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Artifacts stored as files under `<root>/v<format>/`
///
/// Writers go through a sibling temp file and an atomic rename, so readers
/// never see partial archives and concurrent processes may share the
/// directory. The last writer wins.
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(format!("v{}", CACHE_FORMAT_VERSION)),
        }
    }

    /// Path of the archive for `key`
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn is_writable(&self) -> bool {
        true
    }

    async fn get(&self, key: &CacheKey) -> AccelResult<Option<CachedArtifact>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!("Local cache hit: {}", path.display());
                Ok(Some(CachedArtifact::new(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AccelError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn has(&self, key: &CacheKey) -> AccelResult<bool> {
        let path = self.path_for(key);
        fs::try_exists(&path)
            .await
            .map_err(|e| AccelError::io(format!("checking {}", path.display()), e))
    }

    async fn put(&self, key: &CacheKey, artifact: &CachedArtifact) -> AccelResult<()> {
        let dir = self.dir.clone();
        let target = self.path_for(key);
        let bytes = artifact.bytes().to_vec();

        tokio::task::spawn_blocking(move || -> AccelResult<()> {
            std::fs::create_dir_all(&dir)
                .map_err(|e| AccelError::io(format!("creating {}", dir.display()), e))?;
            let mut temp = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| AccelError::io(format!("creating temp file in {}", dir.display()), e))?;
            temp.write_all(&bytes)
                .and_then(|_| temp.as_file().sync_all())
                .map_err(|e| AccelError::io(format!("writing {}", target.display()), e))?;
            temp.persist(&target)
                .map_err(|e| AccelError::io(format!("renaming into {}", target.display()), e.error))?;
            debug!("Stored {}", target.display());
            Ok(())
        })
        .await
        .map_err(|e| AccelError::Internal(format!("cache write task failed: {}", e)))?
    }
}
