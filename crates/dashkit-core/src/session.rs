//! Session Lock - crash marker for the mutating phase
//!
//! The lock file exists only while the compiler is mutating the cache.
//! Finding it at startup means the previous run died midway and the
//! cached compiler output can't be trusted.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ioutil;

/// Marker file at a fixed path
#[derive(Debug, Clone)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a previous run left the marker behind
    pub async fn is_held(&self) -> io::Result<bool> {
        ioutil::path_exists(&self.path).await
    }

    /// Create the marker. Dropping the guard leaves it in place.
    pub async fn acquire(&self) -> io::Result<SessionGuard> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&self.path).await?;
        debug!("Session lock acquired: {:?}", self.path);
        Ok(SessionGuard {
            path: self.path.clone(),
        })
    }
}

/// Proof that the marker was created. Only `release` removes it.
#[must_use = "the session lock stays on disk until released"]
#[derive(Debug)]
pub struct SessionGuard {
    path: PathBuf,
}

impl SessionGuard {
    /// Remove the marker after a clean run
    pub async fn release(self) -> io::Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        debug!("Session lock released: {:?}", self.path);
        Ok(())
    }
}
