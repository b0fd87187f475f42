//! Virtual File System - what the compiler sees
//!
//! Features:
//! - `FileSystem` trait over an abstract `/`-separated path space
//! - `LocalFileSystem`: the real disk, optionally rooted at a base directory
//! - `MappedFileSystem`: exact-path redirects, directory-prefix redirects
//!   and in-memory virtual files layered over a `LocalFileSystem`
//!
//! Errors are plain `std::io::Error`s so "not found" reaches callers verbatim.

pub mod local;
pub mod mapped;
pub mod path;
pub mod resolve;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

pub use local::LocalFileSystem;
pub use mapped::{MappedFileSystem, MappedFileSystemOptions, VirtualContent};
pub use path::normalize;
pub use resolve::{Resolution, Resolver};

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry returned by `read_dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// File operations the compiler relies on
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    async fn write_file(&self, path: &str, content: VirtualContent) -> io::Result<()>;

    /// Remove a file or a directory tree
    async fn unlink(&self, path: &str) -> io::Result<()>;

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Create a directory and its parents
    async fn mkdir(&self, path: &str) -> io::Result<()>;

    /// Modification time in milliseconds since the Unix epoch
    async fn last_modified(&self, path: &str) -> io::Result<u64>;

    /// Copy within this file system. The default goes through memory.
    async fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        let data = self.read_file(from).await?;
        self.write_file(to, VirtualContent::Bytes(data)).await
    }

    async fn read_to_string(&self, path: &str) -> io::Result<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    async fn read_json(&self, path: &str) -> io::Result<Value> {
        let bytes = self.read_file(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Copy between two different file systems: read from one, write to the other
pub async fn copy_across(
    src: &dyn FileSystem,
    from: &str,
    dest: &dyn FileSystem,
    to: &str,
) -> io::Result<()> {
    let data = src.read_file(from).await?;
    dest.write_file(to, VirtualContent::Bytes(data)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_across_instances() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("in.json"), "{\"k\":1}").unwrap();

        let src = LocalFileSystem::new(a.path());
        let dest = MappedFileSystem::new(b.path(), MappedFileSystemOptions::default());

        copy_across(&src, "in.json", &dest, "nested/out.json").await.unwrap();

        let value = dest.read_json("nested/out.json").await.unwrap();
        assert_eq!(value["k"], 1);
        assert!(b.path().join("nested/out.json").exists());
    }

    #[test]
    fn test_entry_serialization() {
        let entry = DirEntry {
            name: "BP".into(),
            kind: EntryKind::Directory,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"name":"BP","kind":"directory"}"#);
    }
}
