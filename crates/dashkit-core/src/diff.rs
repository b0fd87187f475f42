//! Change-Set Builder - manifest vs. source tree
//!
//! The manifest is a JSON array of `{path, hash}` records sorted by path.
//! A diff walks the previous manifest and the sorted source listing in one
//! linear merge, so both sides must use the same byte-wise ordering.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::hasher::Hasher;
use crate::ioutil;

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub path: String,
    pub hash: String,
}

impl HashRecord {
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }
}

/// Result of a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// New manifest, sorted by path
    pub hashes: Vec<HashRecord>,
    /// In the previous manifest, gone from the tree
    pub removed_files: Vec<String>,
    /// New, or content changed since the previous manifest
    pub updated_files: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.removed_files.is_empty() && self.updated_files.is_empty()
    }
}

/// Persisted hash manifest
pub struct Manifest;

impl Manifest {
    /// Load a manifest; a missing file is an empty manifest
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<HashRecord>> {
        let records: Option<Vec<HashRecord>> = ioutil::read_json_if_exists(path).await?;
        Ok(records.unwrap_or_default())
    }

    /// Overwrite the manifest in one write
    pub async fn save(path: impl AsRef<Path>, records: &[HashRecord]) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string(records)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write manifest {}", path.display()))?;
        Ok(())
    }
}

/// Relative path of `file` under `root`, always with `/` separators.
/// Names that are not valid UTF-8 are rejected.
fn relative_key(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", file.display(), root.display()))?;
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| anyhow!("source path is not valid UTF-8: {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Enumerate regular files under `src_dir` as sorted `(key, full path)` pairs
pub fn source_files(src_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    if !src_dir.exists() {
        return Ok(files);
    }
    for path in ioutil::read_dir_recursive(src_dir)
        .with_context(|| format!("failed to list {}", src_dir.display()))?
    {
        files.push((relative_key(src_dir, &path)?, path));
    }
    // String ordering is byte-wise, which matches how manifests are written.
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Diff the previous manifest against the current contents of `src_dir`.
///
/// Every current file is hashed (in parallel, before the merge). The merge
/// itself is sequential and relies on both inputs being sorted.
pub fn source_diff(expected: &[HashRecord], src_dir: &Path, hasher: &Hasher) -> Result<ChangeSet> {
    let sources = source_files(src_dir)?;
    let paths: Vec<PathBuf> = sources.iter().map(|(_, p)| p.clone()).collect();
    let actual = hasher.hash_files(&paths)?;

    let keys: Vec<&str> = sources.iter().map(|(k, _)| k.as_str()).collect();
    let changes = merge(expected, &keys, &actual);

    debug!(
        "Diffed {} source files against {} manifest entries",
        keys.len(),
        expected.len()
    );
    Ok(changes)
}

/// Linear merge of the sorted manifest with the sorted source keys and their hashes
fn merge(expected: &[HashRecord], keys: &[&str], actual: &[String]) -> ChangeSet {
    let mut changes = ChangeSet {
        hashes: Vec::with_capacity(keys.len()),
        ..ChangeSet::default()
    };

    let mut hash_index = 0;
    let mut source_index = 0;

    while hash_index < expected.len() && source_index < keys.len() {
        let record = &expected[hash_index];
        let source_path = keys[source_index];

        match record.path.as_str().cmp(source_path) {
            Ordering::Less => {
                changes.removed_files.push(record.path.clone());
                hash_index += 1;
            }
            Ordering::Greater => {
                changes.updated_files.push(source_path.to_string());
                changes
                    .hashes
                    .push(HashRecord::new(source_path, actual[source_index].clone()));
                source_index += 1;
            }
            Ordering::Equal => {
                let actual_hash = &actual[source_index];
                if &record.hash != actual_hash {
                    changes.updated_files.push(source_path.to_string());
                }
                changes
                    .hashes
                    .push(HashRecord::new(source_path, actual_hash.clone()));
                hash_index += 1;
                source_index += 1;
            }
        }
    }

    for record in &expected[hash_index..] {
        changes.removed_files.push(record.path.clone());
    }
    for (key, hash) in keys[source_index..].iter().zip(&actual[source_index..]) {
        changes.updated_files.push(key.to_string());
        changes.hashes.push(HashRecord::new(*key, hash.clone()));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_removed_added_and_unchanged() {
        let dir = TempDir::new().unwrap();
        let hasher = Hasher::default();
        write(dir.path(), "a.txt", "alpha");
        write(dir.path(), "c.txt", "gamma");

        let h1 = hasher.hash_bytes(b"alpha");
        let previous = vec![HashRecord::new("a.txt", h1.clone()), HashRecord::new("b.txt", "h2")];

        let changes = source_diff(&previous, dir.path(), &hasher).unwrap();

        assert_eq!(changes.removed_files, vec!["b.txt"]);
        assert_eq!(changes.updated_files, vec!["c.txt"]);
        assert_eq!(
            changes.hashes,
            vec![
                HashRecord::new("a.txt", h1),
                HashRecord::new("c.txt", hasher.hash_bytes(b"gamma")),
            ]
        );
    }

    #[test]
    fn test_empty_manifest_marks_everything_updated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "x.bin", "\u{0}\u{1}");

        let changes = source_diff(&[], dir.path(), &Hasher::default()).unwrap();

        assert_eq!(changes.updated_files, vec!["x.bin"]);
        assert!(changes.removed_files.is_empty());
    }

    #[test]
    fn test_empty_tree_marks_everything_removed() {
        let dir = TempDir::new().unwrap();
        let previous = vec![HashRecord::new("a", "1"), HashRecord::new("b/c", "2")];

        let changes = source_diff(&previous, dir.path(), &Hasher::default()).unwrap();

        assert_eq!(changes.removed_files, vec!["a", "b/c"]);
        assert!(changes.updated_files.is_empty());
        assert!(changes.hashes.is_empty());
    }

    #[test]
    fn test_modified_content_is_updated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "BP/entities/pig.json", "{}");
        let previous = vec![HashRecord::new("BP/entities/pig.json", "stale")];

        let changes = source_diff(&previous, dir.path(), &Hasher::default()).unwrap();

        assert_eq!(changes.updated_files, vec!["BP/entities/pig.json"]);
        assert_ne!(changes.hashes[0].hash, "stale");
    }

    #[test]
    fn test_second_diff_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "RP/textures/a.png", "png");
        write(dir.path(), "BP/manifest.json", "{}");
        write(dir.path(), "BP/Z.json", "upper");
        let hasher = Hasher::default();

        let first = source_diff(&[], dir.path(), &hasher).unwrap();
        let second = source_diff(&first.hashes, dir.path(), &hasher).unwrap();

        assert!(second.is_empty());
        assert_eq!(second.hashes, first.hashes);
    }

    #[test]
    fn test_output_is_sorted_bytewise() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.txt", "1");
        write(dir.path(), "B.txt", "2");
        write(dir.path(), "a/z.txt", "3");
        write(dir.path(), "a.txt", "4");

        let changes = source_diff(&[], dir.path(), &Hasher::default()).unwrap();
        let paths: Vec<&str> = changes.hashes.iter().map(|r| r.path.as_str()).collect();

        assert_eq!(paths, vec!["B.txt", "a.txt", "a/z.txt", "b.txt"]);
    }

    #[test]
    fn test_missing_source_dir_is_empty_tree() {
        let dir = TempDir::new().unwrap();
        let previous = vec![HashRecord::new("gone.txt", "h")];

        let changes = source_diff(&previous, &dir.path().join("src"), &Hasher::default()).unwrap();

        assert_eq!(changes.removed_files, vec!["gone.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "BP/ok.json", "{}");
        // Both would collapse to "BP/\u{FFFD}.json" under lossy conversion
        std::fs::write(dir.path().join("BP").join(OsStr::from_bytes(b"\xff.json")), "a").unwrap();
        std::fs::write(dir.path().join("BP").join(OsStr::from_bytes(b"\xfe.json")), "b").unwrap();

        let err = source_files(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("not valid UTF-8"));
    }

    #[test]
    fn test_merge_interleaved() {
        let expected = vec![
            HashRecord::new("a", "1"),
            HashRecord::new("c", "3"),
            HashRecord::new("e", "5"),
        ];
        let keys = ["b", "c", "d", "e"];
        let actual: Vec<String> = ["2", "x", "4", "5"].iter().map(|s| s.to_string()).collect();

        let changes = merge(&expected, &keys, &actual);

        assert_eq!(changes.removed_files, vec!["a"]);
        assert_eq!(changes.updated_files, vec!["b", "c", "d"]);
        assert_eq!(changes.hashes.len(), 4);
        assert_eq!(changes.hashes[1], HashRecord::new("c", "x"));
    }

    #[tokio::test]
    async fn test_manifest_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/sha256.json");

        assert!(Manifest::load(&path).await.unwrap().is_empty());

        let records = vec![HashRecord::new("a.txt", "h1")];
        Manifest::save(&path, &records).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"[{"path":"a.txt","hash":"h1"}]"#
        );
        assert_eq!(Manifest::load(&path).await.unwrap(), records);
    }
}
