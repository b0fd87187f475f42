//! Real disk access, optionally rooted at a base directory

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{DirEntry, EntryKind, FileSystem, VirtualContent};

/// File system backed by the local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    base_dir: PathBuf,
}

impl LocalFileSystem {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute paths (or an empty base) are used as-is, others are joined to the base
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if self.base_dir.as_os_str().is_empty() || candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        read_path(&self.resolve_path(path)).await
    }

    async fn write_file(&self, path: &str, content: VirtualContent) -> io::Result<()> {
        write_path(&self.resolve_path(path), content.as_bytes()).await
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        remove_path(&self.resolve_path(path)).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        list_path(&self.resolve_path(path)).await
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(self.resolve_path(path)).await
    }

    async fn last_modified(&self, path: &str) -> io::Result<u64> {
        modified_millis(&self.resolve_path(path)).await
    }

    async fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        copy_path(&self.resolve_path(from), &self.resolve_path(to)).await
    }
}

pub(crate) async fn read_path(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Write a file, creating missing parent directories
pub(crate) async fn write_path(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

pub(crate) async fn remove_path(path: &Path) -> io::Result<()> {
    if tokio::fs::symlink_metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

pub(crate) async fn list_path(path: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let kind = if entry.file_type().await?.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }
    Ok(entries)
}

pub(crate) async fn modified_millis(path: &Path) -> io::Result<u64> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

/// Copy a file, creating missing parent directories of the destination
pub(crate) async fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await.map(|_| ())
}
