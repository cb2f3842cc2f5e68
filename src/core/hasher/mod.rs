//! # Hasher Module
//!
//! Content hashing for exact dedup and idempotent uploads.
//!
//! A `ContentHash` is the SHA-256 of a file's full byte stream, rendered as
//! lowercase hex. Two files are "the same content" iff their hashes match;
//! nothing cheaper (size, mtime, name) ever stands in for that comparison.
//!
//! ## Example
//! ```rust,ignore
//! use card_ingest::core::hasher::{hash_file, HashPool};
//!
//! let hash = hash_file(&path)?;
//! let pool = HashPool::new(4)?;
//! let results = pool.hash_all(&files, |done, path| println!("{} {}", done, path.display()));
//! ```

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HashError;

const READ_CHUNK: usize = 1024 * 1024;

/// SHA-256 digest of a file's bytes, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash an in-memory buffer
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse a stored hex digest
    pub fn from_hex(hex_digest: &str) -> Option<Self> {
        let normalized = hex_digest.trim().to_ascii_lowercase();
        let bytes = hex::decode(&normalized).ok()?;
        (bytes.len() == 32).then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream a file through SHA-256 without loading it whole
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
    let io_err = |source| HashError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let (_, hash) = copy_and_hash(&mut file, &mut std::io::sink()).map_err(io_err)?;
    Ok(hash)
}

/// Copy `reader` into `writer`, hashing the bytes on the way through.
///
/// Returns the byte count and the content hash of everything copied.
pub fn copy_and_hash<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<(u64, ContentHash)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }

    Ok((total, ContentHash(hex::encode(hasher.finalize()))))
}

/// Bounded pool for hashing many files in parallel
pub struct HashPool {
    pool: rayon::ThreadPool,
}

impl HashPool {
    pub fn new(workers: usize) -> Result<Self, HashError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("hash-{}", i))
            .build()
            .map_err(|e| HashError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Hash every path, preserving input order in the output.
    ///
    /// `on_progress` is called from worker threads with the running count.
    pub fn hash_all<F>(
        &self,
        paths: &[PathBuf],
        on_progress: F,
    ) -> Vec<Result<ContentHash, HashError>>
    where
        F: Fn(usize, &Path) + Sync,
    {
        let completed = AtomicUsize::new(0);
        self.pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    let result = hash_file(path);
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    on_progress(done, path);
                    result
                })
                .collect()
        })
    }
}
