//! Mapped File System - redirects and in-memory files over the real disk
//!
//! Virtual entries live for the lifetime of the file system and are never
//! flushed to disk; use `virtual_content` to copy one out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::local::{copy_path, list_path, modified_millis, read_path, remove_path, write_path};
use super::path::{self, normalize};
use super::resolve::{
    BaseDirResolver, DirectoryMappingResolver, FileMappingResolver, Resolution, ResolverChain,
    VirtualFileResolver,
};
use super::{DirEntry, EntryKind, FileSystem};

/// Content of a virtual file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl VirtualContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VirtualContent::Text(text) => text.as_bytes(),
            VirtualContent::Bytes(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            VirtualContent::Text(text) => text.into_bytes(),
            VirtualContent::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for VirtualContent {
    fn from(text: String) -> Self {
        VirtualContent::Text(text)
    }
}

impl From<&str> for VirtualContent {
    fn from(text: &str) -> Self {
        VirtualContent::Text(text.to_string())
    }
}

impl From<Vec<u8>> for VirtualContent {
    fn from(bytes: Vec<u8>) -> Self {
        VirtualContent::Bytes(bytes)
    }
}

/// Shared table of virtual entries. A declared key with no content was unlinked.
#[derive(Debug, Clone, Default)]
pub struct VirtualStore {
    entries: Arc<RwLock<HashMap<String, Option<VirtualContent>>>>,
}

impl VirtualStore {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Option<VirtualContent>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Option<VirtualContent>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a key as virtual without content
    pub fn declare(&self, key: &str) {
        self.write().entry(key.to_string()).or_insert(None);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<VirtualContent> {
        self.read().get(key).cloned().flatten()
    }

    pub fn set(&self, key: &str, content: VirtualContent) {
        self.write().insert(key.to_string(), Some(content));
    }

    /// Drop the content of a key, keeping it virtual. False if there was none.
    pub fn clear(&self, key: &str) -> bool {
        self.write().get_mut(key).and_then(Option::take).is_some()
    }

    /// Names of populated entries directly inside `dir`
    pub fn children(&self, dir: &str) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(key, content)| content.is_some() && path::parent(key) == dir)
            .map(|(key, _)| path::file_name(key).to_string())
            .collect()
    }
}

/// Construction options; keys are normalised on construction
#[derive(Debug, Clone, Default)]
pub struct MappedFileSystemOptions {
    pub file_mappings: HashMap<String, PathBuf>,
    pub directory_mappings: HashMap<String, PathBuf>,
    pub virtual_files: HashMap<String, VirtualContent>,
}

/// File system with exact, prefix and in-memory redirection
pub struct MappedFileSystem {
    chain: ResolverChain,
    virtual_files: VirtualStore,
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}"))
}

impl MappedFileSystem {
    pub fn new(base_dir: impl AsRef<Path>, options: MappedFileSystemOptions) -> Self {
        let normalize_keys = |map: HashMap<String, PathBuf>| -> HashMap<String, PathBuf> {
            map.into_iter().map(|(k, v)| (normalize(&k), v)).collect()
        };

        let virtual_files = VirtualStore::default();
        for (key, content) in options.virtual_files {
            virtual_files.set(&normalize(&key), content);
        }

        let chain = ResolverChain::new(vec![
            Box::new(FileMappingResolver::new(normalize_keys(options.file_mappings))),
            Box::new(VirtualFileResolver::new(virtual_files.clone())),
            Box::new(DirectoryMappingResolver::new(normalize_keys(
                options.directory_mappings,
            ))),
            Box::new(BaseDirResolver::new(base_dir)),
        ]);

        Self {
            chain,
            virtual_files,
        }
    }

    /// Where `path` resolves to
    pub fn resolve(&self, path: &str) -> Resolution {
        self.chain.resolve(&normalize(path))
    }

    /// Declare (or overwrite) an in-memory file
    pub fn add_virtual_file(&self, path: &str, content: impl Into<VirtualContent>) {
        self.virtual_files.set(&normalize(path), content.into());
    }

    /// Current content of a virtual file
    pub fn virtual_content(&self, path: &str) -> Option<VirtualContent> {
        self.virtual_files.get(&normalize(path))
    }

    pub fn is_virtual(&self, path: &str) -> bool {
        matches!(self.resolve(path), Resolution::Virtual(_))
    }
}

#[async_trait]
impl FileSystem for MappedFileSystem {
    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        match self.resolve(path) {
            Resolution::Virtual(key) => self
                .virtual_files
                .get(&key)
                .map(VirtualContent::into_bytes)
                .ok_or_else(|| not_found(&key)),
            Resolution::Real(real) => read_path(&real).await,
        }
    }

    async fn write_file(&self, path: &str, content: VirtualContent) -> io::Result<()> {
        match self.resolve(path) {
            Resolution::Virtual(key) => {
                self.virtual_files.set(&key, content);
                Ok(())
            }
            Resolution::Real(real) => write_path(&real, content.as_bytes()).await,
        }
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        match self.resolve(path) {
            Resolution::Virtual(key) => {
                if self.virtual_files.clear(&key) {
                    Ok(())
                } else {
                    Err(not_found(&key))
                }
            }
            Resolution::Real(real) => remove_path(&real).await,
        }
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let normalized = normalize(path);
        let real = match self.chain.resolve(&normalized) {
            Resolution::Virtual(key) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a directory: {key}"),
                ))
            }
            Resolution::Real(real) => real,
        };

        let virtual_children = self.virtual_files.children(&normalized);
        let mut entries = match list_path(&real).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !virtual_children.is_empty() => {
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        for name in virtual_children {
            if !entries.iter().any(|entry| entry.name == name) {
                entries.push(DirEntry {
                    name,
                    kind: EntryKind::File,
                });
            }
        }
        Ok(entries)
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        match self.resolve(path) {
            Resolution::Virtual(key) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("virtual file in the way: {key}"),
            )),
            Resolution::Real(real) => tokio::fs::create_dir_all(real).await,
        }
    }

    /// Virtual entries report the epoch
    async fn last_modified(&self, path: &str) -> io::Result<u64> {
        match self.resolve(path) {
            Resolution::Virtual(key) => match self.virtual_files.get(&key) {
                Some(_) => Ok(0),
                None => Err(not_found(&key)),
            },
            Resolution::Real(real) => modified_millis(&real).await,
        }
    }

    async fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        match (self.resolve(from), self.resolve(to)) {
            (Resolution::Virtual(src), Resolution::Virtual(dest)) => {
                let content = self.virtual_files.get(&src).ok_or_else(|| not_found(&src))?;
                self.virtual_files.set(&dest, content);
                Ok(())
            }
            (Resolution::Real(src), Resolution::Virtual(dest)) => {
                let data = read_path(&src).await?;
                self.virtual_files.set(&dest, VirtualContent::Bytes(data));
                Ok(())
            }
            (Resolution::Virtual(src), Resolution::Real(dest)) => {
                let content = self.virtual_files.get(&src).ok_or_else(|| not_found(&src))?;
                write_path(&dest, content.as_bytes()).await
            }
            (Resolution::Real(src), Resolution::Real(dest)) => copy_path(&src, &dest).await,
        }
    }
}
