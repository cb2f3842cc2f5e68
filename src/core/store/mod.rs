//! # Store Module
//!
//! The persistent indexes that make ingest idempotent across runs.
//!
//! - `IngestIndex` - every content hash ever copied off a card (append-only),
//!   plus a ledger of files that repeatedly failed to hash
//! - `UploadIndex` - the last content hash uploaded to each remote key
//!
//! ## Backends
//! - `SqliteStore` - one SQLite file (WAL) holding all three tables
//! - `InMemoryStore` - for tests

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{IngestIndex, UploadIndex};

use crate::core::hasher::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A content hash that has been ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedRecord {
    pub hash: ContentHash,
    pub size: u64,
    pub first_seen: DateTime<Utc>,
    /// Where the content was first seen, e.g. `<session>/<relpath>`
    pub source_hint: String,
}

/// A record to insert after a successful copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIngestRecord {
    pub hash: ContentHash,
    pub size: u64,
    pub source_hint: String,
}

/// What the remote currently holds under a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub key: String,
    pub hash: ContentHash,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn now(key: impl Into<String>, hash: ContentHash, size: u64) -> Self {
        Self {
            key: key.into(),
            hash,
            size,
            uploaded_at: Utc::now(),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    /// Distinct content hashes ingested
    pub ingested_files: usize,
    /// Total bytes of distinct ingested content
    pub ingested_bytes: u64,
    /// Remote keys with a recorded upload
    pub uploads: usize,
    /// Paths with at least one recorded hash failure
    pub failed_files: usize,
    pub first_ingest: Option<DateTime<Utc>>,
    pub last_ingest: Option<DateTime<Utc>>,
}
