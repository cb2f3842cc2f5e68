//! In-memory store backend for testing.

use super::{IngestIndex, IngestStats, IngestedRecord, NewIngestRecord, UploadIndex, UploadRecord};
use crate::core::hasher::ContentHash;
use crate::error::StoreError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    ingested: HashMap<ContentHash, IngestedRecord>,
    uploads: HashMap<String, UploadRecord>,
    failures: HashMap<PathBuf, u32>,
}

/// In-memory store
///
/// Same semantics as `SqliteStore`, without persistence.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }
}

impl IngestIndex for InMemoryStore {
    fn lookup_many(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>, StoreError> {
        let tables = self.read()?;
        Ok(hashes
            .iter()
            .filter(|h| tables.ingested.contains_key(*h))
            .cloned()
            .collect())
    }

    fn record_many(&self, records: &[NewIngestRecord]) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        let now = Utc::now();
        let mut inserted = 0;
        for record in records {
            if tables.ingested.contains_key(&record.hash) {
                continue;
            }
            tables.ingested.insert(
                record.hash.clone(),
                IngestedRecord {
                    hash: record.hash.clone(),
                    size: record.size,
                    first_seen: now,
                    source_hint: record.source_hint.clone(),
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    fn known_sizes(&self) -> Result<HashSet<u64>, StoreError> {
        Ok(self.read()?.ingested.values().map(|r| r.size).collect())
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<IngestedRecord>, StoreError> {
        Ok(self.read()?.ingested.get(hash).cloned())
    }

    fn record_hash_failures(&self, failures: &[(PathBuf, u64)]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        for (path, _) in failures {
            *tables.failures.entry(path.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    fn persistent_failures(&self, min_count: u32) -> Result<HashSet<PathBuf>, StoreError> {
        Ok(self
            .read()?
            .failures
            .iter()
            .filter(|(_, count)| **count >= min_count)
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn stats(&self) -> Result<IngestStats, StoreError> {
        let tables = self.read()?;
        Ok(IngestStats {
            ingested_files: tables.ingested.len(),
            ingested_bytes: tables.ingested.values().map(|r| r.size).sum(),
            uploads: tables.uploads.len(),
            failed_files: tables.failures.len(),
            first_ingest: tables.ingested.values().map(|r| r.first_seen).min(),
            last_ingest: tables.ingested.values().map(|r| r.first_seen).max(),
        })
    }
}

impl UploadIndex for InMemoryStore {
    fn uploaded_hash(&self, key: &str) -> Result<Option<ContentHash>, StoreError> {
        Ok(self.read()?.uploads.get(key).map(|r| r.hash.clone()))
    }

    fn mark_uploaded(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.write()?
            .uploads
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn upload_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.uploads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_ignores_known_hashes() {
        let store = InMemoryStore::new();
        let hash = ContentHash::of_bytes(b"a");
        let record = NewIngestRecord {
            hash: hash.clone(),
            size: 1,
            source_hint: "s/a".to_string(),
        };

        assert_eq!(store.record_many(&[record.clone(), record]).unwrap(), 1);
        assert!(store.lookup_many(&[hash]).unwrap().len() == 1);
        assert_eq!(store.stats().unwrap().ingested_bytes, 1);
    }

    #[test]
    fn memory_store_tracks_uploads() {
        let store = InMemoryStore::new();
        let hash = ContentHash::of_bytes(b"thumb");
        store
            .mark_uploaded(&UploadRecord::now("k", hash.clone(), 5))
            .unwrap();
        assert_eq!(store.uploaded_hash("k").unwrap(), Some(hash));
        assert_eq!(store.upload_count().unwrap(), 1);
    }
}
