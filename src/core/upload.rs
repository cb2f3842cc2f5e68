//! # Upload Module
//!
//! Idempotent uploads: an artifact is transferred only when the remote
//! does not already hold the same bytes under its key. The upload record
//! is written only after the store accepted the object.

use crate::core::hasher::ContentHash;
use crate::core::remote::ObjectStore;
use crate::core::store::{UploadIndex, UploadRecord};
use crate::error::RemoteError;
use std::path::Path;
use tracing::{debug, warn};

/// Per-artifact upload result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { bytes: u64 },
    /// The recorded hash for this key already matches
    Unchanged,
    Failed { reason: String },
    /// The store could not be reached even after retries. Ends the stage.
    Unreachable { reason: String },
}

impl UploadOutcome {
    /// The remote now holds the artifact
    pub fn in_store(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. } | UploadOutcome::Unchanged)
    }
}

pub struct Uploader<'a> {
    store: &'a dyn ObjectStore,
    index: &'a dyn UploadIndex,
}

impl<'a> Uploader<'a> {
    pub fn new(store: &'a dyn ObjectStore, index: &'a dyn UploadIndex) -> Self {
        Self { store, index }
    }

    pub fn upload_file(&self, key: &str, path: &Path) -> UploadOutcome {
        match std::fs::read(path) {
            Ok(bytes) => self.upload_bytes(key, &bytes),
            Err(e) => UploadOutcome::Failed {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        }
    }

    pub fn upload_bytes(&self, key: &str, bytes: &[u8]) -> UploadOutcome {
        let hash = ContentHash::of_bytes(bytes);

        match self.index.uploaded_hash(key) {
            Ok(Some(previous)) if previous == hash => {
                debug!(key, "Remote already holds identical content");
                return UploadOutcome::Unchanged;
            }
            Ok(_) => {}
            // Without the record we can only upload again
            Err(e) => warn!(key, error = %e, "Upload record lookup failed"),
        }

        match self.store.put(key, bytes) {
            Ok(()) => {}
            Err(e @ RemoteError::Unreachable { .. }) => {
                return UploadOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                return UploadOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }

        let size = bytes.len() as u64;
        if let Err(e) = self.index.mark_uploaded(&UploadRecord::now(key, hash, size)) {
            warn!(key, error = %e, "Uploaded but could not record it; the next run will upload again");
        }
        debug!(key, bytes = size, "Uploaded");
        UploadOutcome::Uploaded { bytes: size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::remote::MemoryObjectStore;
    use crate::core::store::InMemoryStore;

    #[test]
    fn second_upload_of_same_bytes_is_unchanged() {
        let remote = MemoryObjectStore::new();
        let index = InMemoryStore::new();
        let uploader = Uploader::new(&remote, &index);

        assert_eq!(uploader.upload_bytes("s/a.jpg", b"one"), UploadOutcome::Uploaded { bytes: 3 });
        assert_eq!(uploader.upload_bytes("s/a.jpg", b"one"), UploadOutcome::Unchanged);
        assert_eq!(remote.put_count("s/a.jpg"), 1);
    }

    #[test]
    fn changed_bytes_are_uploaded_again() {
        let remote = MemoryObjectStore::new();
        let index = InMemoryStore::new();
        let uploader = Uploader::new(&remote, &index);

        uploader.upload_bytes("s/a.jpg", b"one");
        assert!(matches!(uploader.upload_bytes("s/a.jpg", b"two"), UploadOutcome::Uploaded { .. }));
        assert_eq!(remote.get("s/a.jpg").unwrap(), b"two");
        assert_eq!(
            index.uploaded_hash("s/a.jpg").unwrap(),
            Some(ContentHash::of_bytes(b"two"))
        );
    }

    #[test]
    fn failed_put_leaves_no_record() {
        let remote = MemoryObjectStore::new();
        remote.fail_puts_with_prefix("s/");
        let index = InMemoryStore::new();
        let uploader = Uploader::new(&remote, &index);

        assert!(matches!(uploader.upload_bytes("s/a.jpg", b"one"), UploadOutcome::Failed { .. }));
        assert_eq!(index.uploaded_hash("s/a.jpg").unwrap(), None);

        remote.clear_faults();
        assert!(matches!(uploader.upload_bytes("s/a.jpg", b"one"), UploadOutcome::Uploaded { .. }));
    }

    #[test]
    fn unreachable_store_is_reported_apart_from_rejections() {
        let remote = MemoryObjectStore::new();
        remote.set_offline(true);
        let index = InMemoryStore::new();
        let uploader = Uploader::new(&remote, &index);

        let outcome = uploader.upload_bytes("s/a.jpg", b"one");
        assert!(matches!(outcome, UploadOutcome::Unreachable { .. }));
        assert!(!outcome.in_store());
        assert_eq!(index.uploaded_hash("s/a.jpg").unwrap(), None);
    }

    #[test]
    fn missing_local_file_is_a_failure() {
        let remote = MemoryObjectStore::new();
        let index = InMemoryStore::new();
        let outcome = Uploader::new(&remote, &index).upload_file("s/a.jpg", Path::new("/nonexistent/a.jpg"));
        assert!(!outcome.in_store());
    }
}
