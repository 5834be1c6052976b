use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::VectorIndex;
use crate::{RelayError, Result};

/// Identity of one version of the index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug)]
struct Cached {
    index: Arc<VectorIndex>,
    stamp: FileStamp,
}

/// Process-wide cache of the serving index.
///
/// Every lookup stats the index file. A changed modification time or size (a
/// rebuild finished while serving) reloads the file; a vanished file drops the cached
/// copy and reports [`RelayError::IndexNotFound`].
#[derive(Debug)]
pub struct IndexCache {
    path: PathBuf,
    cached: RwLock<Option<Cached>>,
}

impl IndexCache {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub async fn get(&self) -> Result<Arc<VectorIndex>> {
        let stamp = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => FileStamp {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let dropped = self.cached.write().await.take().is_some();
                if dropped {
                    warn!(
                        "Index file {} disappeared, dropping cached index",
                        self.path.display()
                    );
                }
                return Err(RelayError::IndexNotFound {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref().filter(|c| c.stamp == stamp) {
                return Ok(Arc::clone(&entry.index));
            }
        }

        let mut cached = self.cached.write().await;
        // another request may have reloaded while we waited for the lock
        if let Some(entry) = cached.as_ref().filter(|c| c.stamp == stamp) {
            return Ok(Arc::clone(&entry.index));
        }

        let index = Arc::new(self.read_index().await?);
        info!(
            "Loaded index with {} documents (model {}) from {}",
            index.len(),
            index.model(),
            self.path.display()
        );
        *cached = Some(Cached {
            index: Arc::clone(&index),
            stamp,
        });

        Ok(index)
    }

    /// Forget the cached index; the next lookup reads the file again
    #[inline]
    pub async fn invalidate(&self) {
        debug!("Invalidating cached index for {}", self.path.display());
        self.cached.write().await.take();
    }

    async fn read_index(&self) -> Result<VectorIndex> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RelayError::IndexNotFound {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        VectorIndex::from_slice(&bytes, &self.path)
    }
}
