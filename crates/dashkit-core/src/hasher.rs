//! Content Hasher - streaming file digests
//!
//! Features:
//! - SHA-256 by default (manifests stay readable by other tools)
//! - BLAKE3 as an opt-in alternative
//! - Constant memory per file (64 KiB read buffer)
//! - Parallel batch hashing with Rayon

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest used for manifest entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// File name of the manifest written with this algorithm
    pub fn manifest_file_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256.json",
            HashAlgorithm::Blake3 => "blake3.json",
        }
    }
}

/// Streaming digest state for either algorithm
enum DigestState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestState::Sha256(h) => h.update(bytes),
            DigestState::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// File hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher {
    algorithm: HashAlgorithm,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash a single file, streaming its contents
    pub fn hash_file(&self, path: impl AsRef<Path>) -> io::Result<String> {
        let file = File::open(path.as_ref())?;
        self.hash_reader(file)
    }

    /// Hash everything readable from `reader`
    pub fn hash_reader(&self, reader: impl Read) -> io::Result<String> {
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, reader);
        let mut state = DigestState::new(self.algorithm);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => state.update(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(state.finalize_hex())
    }

    /// Hash in-memory bytes
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        let mut state = DigestState::new(self.algorithm);
        state.update(bytes);
        state.finalize_hex()
    }

    /// Hash a batch of files in parallel. Results keep the input order.
    pub fn hash_files(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        paths
            .par_iter()
            .map(|path| {
                self.hash_file(path)
                    .with_context(|| format!("failed to hash {}", path.display()))
            })
            .collect()
    }
}
