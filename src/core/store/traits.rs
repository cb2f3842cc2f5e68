//! Store trait definitions.

use super::{IngestStats, IngestedRecord, NewIngestRecord, UploadRecord};
use crate::core::hasher::ContentHash;
use crate::error::StoreError;
use std::collections::HashSet;
use std::path::PathBuf;

/// The global content-dedup index
pub trait IngestIndex: Send + Sync {
    /// Which of these hashes were ingested before
    fn lookup_many(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>, StoreError>;

    /// Insert records in one transaction, ignoring hashes already present.
    ///
    /// Returns how many rows were actually inserted.
    fn record_many(&self, records: &[NewIngestRecord]) -> Result<usize, StoreError>;

    /// Every size that has been ingested. Only ever used to prove a file new.
    fn known_sizes(&self) -> Result<HashSet<u64>, StoreError>;

    fn get(&self, hash: &ContentHash) -> Result<Option<IngestedRecord>, StoreError>;

    /// Count one more hash failure per path
    fn record_hash_failures(&self, failures: &[(PathBuf, u64)]) -> Result<(), StoreError>;

    /// Paths that failed to hash at least `min_count` times
    fn persistent_failures(&self, min_count: u32) -> Result<HashSet<PathBuf>, StoreError>;

    fn stats(&self) -> Result<IngestStats, StoreError>;
}

/// Per-key record of what was last uploaded
pub trait UploadIndex: Send + Sync {
    fn uploaded_hash(&self, key: &str) -> Result<Option<ContentHash>, StoreError>;

    /// Record a completed upload. Only called after the put succeeded.
    fn mark_uploaded(&self, record: &UploadRecord) -> Result<(), StoreError>;

    fn upload_count(&self) -> Result<usize, StoreError>;
}
