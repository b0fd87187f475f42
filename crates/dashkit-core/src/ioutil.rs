//! File helpers where "not found" is an expected answer
//!
//! Only `NotFound` is swallowed (turned into `None`/`false`); every other
//! I/O error propagates to the caller.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tracing::debug;
use walkdir::WalkDir;

/// Check whether a path exists
pub async fn path_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match tokio::fs::metadata(path.as_ref()).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read a text file, `None` when it does not exist
pub async fn read_text_if_exists(path: impl AsRef<Path>) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(path.as_ref()).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read and parse a JSON file, `None` when it does not exist
pub async fn read_json_if_exists<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    match read_text_if_exists(path).await? {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Read and parse a JSON file that must exist
pub async fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Remove a file or a whole directory tree. Missing paths are fine.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// All regular files below `dir`, recursively
pub fn read_dir_recursive(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Copy the contents of `src` into `dest`. Directories are created first,
/// then every file is copied concurrently.
pub async fn copy_dir(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<usize> {
    let src = src.as_ref().to_path_buf();
    let dest = dest.as_ref().to_path_buf();

    let mut copies = Vec::new();
    for entry in WalkDir::new(&src).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(&src)?.to_path_buf();
        let target = dest.join(&relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else if entry.file_type().is_file() {
            copies.push((entry.into_path(), target));
        }
    }

    let count = copies.len();
    let mut tasks = JoinSet::new();
    for (from, to) in copies {
        tasks.spawn(async move {
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&from, &to)
                .await
                .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
            anyhow::Ok(())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }

    debug!("Copied {} files from {:?} to {:?}", count, src, dest);
    Ok(count)
}

/// Expand each glob pattern and remove every match
pub fn remove_globs<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let paths = glob::glob(pattern).with_context(|| format!("invalid glob pattern {pattern}"))?;
        for path in paths {
            let path = path?;
            if path.is_dir() {
                std::fs::remove_dir_all(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            } else {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
            removed.push(path);
        }
    }
    Ok(removed)
}
