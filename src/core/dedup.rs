//! # Dedup Filter
//!
//! Decides which scanned files are new content.
//!
//! 1. Sizes never seen before prove a file new without reading it; its hash
//!    is computed later while copying. Equal size proves nothing.
//! 2. Everything else is hashed and looked up in the ingest index.
//! 3. Files that look like a complete copy inside a recent incomplete
//!    session are verified by hash and committed, so that session is
//!    resumed instead of duplicated.

use crate::core::hasher::{hash_file, ContentHash, HashPool};
use crate::core::scanner::MediaFile;
use crate::core::session::{relative_key, RecoveryIndex, RecoveryMatch, SessionId};
use crate::core::store::{IngestIndex, NewIngestRecord};
use crate::error::{Result, ScanError};
use crate::events::{Event, EventSender, HashEvent, HashProgress};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of filtering a scan against the ingest index
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Files to copy, sorted by relative path
    pub new_files: Vec<MediaFile>,
    /// Files already copied into `resume_session`, now committed
    pub recovered: Vec<MediaFile>,
    pub resume_session: Option<SessionId>,
    /// Files whose content was ingested before
    pub skipped: usize,
    /// Files skipped because they failed to hash on earlier runs
    pub skipped_failures: usize,
    /// Files that failed to hash this run
    pub hash_errors: usize,
    /// New files proven new by size alone
    pub size_prefiltered: usize,
}

impl DedupOutcome {
    /// Whether this run has anything to put in a session
    pub fn has_new_content(&self) -> bool {
        !self.new_files.is_empty() || !self.recovered.is_empty()
    }
}

struct Candidate {
    file: MediaFile,
    recovery: Option<RecoveryMatch>,
}

pub struct DedupFilter<'a> {
    index: &'a dyn IngestIndex,
    pool: HashPool,
    recovery: RecoveryIndex,
    failure_skip_threshold: u32,
}

impl<'a> DedupFilter<'a> {
    pub fn new(
        index: &'a dyn IngestIndex,
        hash_workers: usize,
        recovery: RecoveryIndex,
        failure_skip_threshold: u32,
    ) -> Result<Self> {
        Ok(Self {
            index,
            pool: HashPool::new(hash_workers)?,
            recovery,
            failure_skip_threshold,
        })
    }

    pub fn filter(
        &self,
        source_root: &Path,
        files: Vec<MediaFile>,
        events: &EventSender,
    ) -> Result<DedupOutcome> {
        let mut outcome = DedupOutcome::default();

        let persistent = if self.failure_skip_threshold > 0 {
            self.index.persistent_failures(self.failure_skip_threshold)?
        } else {
            HashSet::new()
        };
        let known_sizes = self.index.known_sizes()?;

        let mut to_hash = Vec::new();
        for file in files {
            if persistent.contains(&file.path) {
                debug!(path = %file.path.display(), "Skipping file that repeatedly failed to hash");
                outcome.skipped_failures += 1;
                continue;
            }

            let recovery = self.recovery.find(&file.relative_path, file.size);
            if recovery.is_none() && !known_sizes.contains(&file.size) && file.content_hash().is_none() {
                outcome.size_prefiltered += 1;
                outcome.new_files.push(file);
            } else {
                to_hash.push(Candidate { file, recovery });
            }
        }

        events.send(Event::Hash(HashEvent::Started {
            total_files: to_hash.len(),
            size_prefiltered: outcome.size_prefiltered,
        }));

        let candidates = self.hash_candidates(source_root, to_hash, &mut outcome, events)?;

        let hashes: Vec<ContentHash> = candidates
            .iter()
            .filter_map(|c| c.file.content_hash().cloned())
            .collect();
        let known = self.index.lookup_many(&hashes)?;

        // Verified recoveries, split by whether they belong to the session we resume
        let mut verified: Vec<(Candidate, SessionId)> = Vec::new();
        for candidate in candidates {
            let Some(hash) = candidate.file.content_hash() else {
                continue;
            };
            if known.contains(hash) {
                outcome.skipped += 1;
                continue;
            }
            match candidate.recovery.as_ref().filter(|m| verify_recovery(m, hash)) {
                Some(found) => {
                    let session = found.session.clone();
                    verified.push((candidate, session));
                }
                None => outcome.new_files.push(candidate.file),
            }
        }

        outcome.resume_session = verified.iter().map(|(_, session)| session.clone()).max();
        let mut records = Vec::with_capacity(verified.len());
        for (candidate, session) in verified {
            if let Some(hash) = candidate.file.content_hash() {
                records.push(NewIngestRecord {
                    hash: hash.clone(),
                    size: candidate.file.size,
                    source_hint: format!("{}/{}", session, relative_key(&candidate.file.relative_path)),
                });
            }
            if Some(&session) == outcome.resume_session.as_ref() {
                outcome.recovered.push(candidate.file);
            } else {
                // Already safe in an older session; nothing left to do for it here
                outcome.skipped += 1;
            }
        }
        if !records.is_empty() {
            let committed = self.index.record_many(&records)?;
            info!(
                committed,
                session = ?outcome.resume_session,
                "Recovered files from an incomplete session"
            );
        }

        outcome.new_files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            new = outcome.new_files.len(),
            recovered = outcome.recovered.len(),
            skipped = outcome.skipped,
            size_prefiltered = outcome.size_prefiltered,
            hash_errors = outcome.hash_errors,
            "Dedup complete"
        );
        events.send(Event::Hash(HashEvent::Completed {
            new_files: outcome.new_files.len(),
            skipped: outcome.skipped,
            recovered: outcome.recovered.len(),
        }));

        Ok(outcome)
    }

    /// Hash candidates in the pool; failures are recorded and dropped
    fn hash_candidates(
        &self,
        source_root: &Path,
        candidates: Vec<Candidate>,
        outcome: &mut DedupOutcome,
        events: &EventSender,
    ) -> Result<Vec<Candidate>> {
        let pending: Vec<_> = candidates
            .iter()
            .filter(|c| c.file.content_hash().is_none())
            .map(|c| c.file.path.clone())
            .collect();
        let total = pending.len();
        let mut results = self
            .pool
            .hash_all(&pending, |completed, path| {
                events.send(Event::Hash(HashEvent::Progress(HashProgress {
                    completed,
                    total,
                    current_path: path.to_path_buf(),
                })));
            })
            .into_iter();

        let mut hashed = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for candidate in candidates {
            if candidate.file.content_hash().is_none() {
                match results.next() {
                    Some(Ok(hash)) => {
                        candidate.file.set_hash(hash);
                    }
                    Some(Err(e)) => {
                        warn!(path = %candidate.file.path.display(), error = %e, "Hash failed");
                        events.send(Event::Hash(HashEvent::Error {
                            path: candidate.file.path.clone(),
                            message: e.to_string(),
                        }));
                        failures.push((candidate.file.path.clone(), candidate.file.size));
                        continue;
                    }
                    None => continue,
                }
            }
            hashed.push(candidate);
        }

        if !failures.is_empty() {
            if let Err(e) = std::fs::read_dir(source_root) {
                return Err(ScanError::VolumeLost {
                    path: source_root.to_path_buf(),
                    reason: e.to_string(),
                }
                .into());
            }
            outcome.hash_errors = failures.len();
            self.index.record_hash_failures(&failures)?;
        }

        Ok(hashed)
    }
}

/// The volume file matches the session copy if its hash equals the recorded one.
///
/// Manifests written before the hash was known fall back to hashing the copy;
/// copies only ever appear under their final name once complete.
fn verify_recovery(found: &RecoveryMatch, volume_hash: &ContentHash) -> bool {
    match &found.recorded_hash {
        Some(recorded) => recorded == volume_hash,
        None => hash_file(&found.local_path).is_ok_and(|local| &local == volume_hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::MediaKind;
    use crate::core::session::Session;
    use crate::core::store::InMemoryStore;
    use crate::events::null_sender;
    use std::fs;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn card_file(root: &Path, rel: &str, bytes: &[u8]) -> MediaFile {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        MediaFile::new(
            path,
            PathBuf::from(rel),
            bytes.len() as u64,
            SystemTime::UNIX_EPOCH,
            MediaKind::classify(Path::new(rel)),
        )
    }

    fn seed(store: &InMemoryStore, bytes: &[u8]) {
        store
            .record_many(&[NewIngestRecord {
                hash: ContentHash::of_bytes(bytes),
                size: bytes.len() as u64,
                source_hint: "earlier".to_string(),
            }])
            .unwrap();
    }

    fn filter<'a>(store: &'a InMemoryStore, recovery: RecoveryIndex) -> DedupFilter<'a> {
        DedupFilter::new(store, 2, recovery, 2).unwrap()
    }

    #[test]
    fn unseen_size_is_new_without_hashing() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        seed(&store, b"four");
        let files = vec![card_file(card.path(), "IMG_0001.JPG", b"five!")];

        let outcome = filter(&store, RecoveryIndex::empty())
            .filter(card.path(), files, &null_sender())
            .unwrap();

        assert_eq!(outcome.new_files.len(), 1);
        assert_eq!(outcome.size_prefiltered, 1);
        assert!(outcome.new_files[0].content_hash().is_none());
    }

    #[test]
    fn equal_size_different_content_is_new() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        seed(&store, b"AAAA");
        let files = vec![card_file(card.path(), "IMG_0001.JPG", b"BBBB")];

        let outcome = filter(&store, RecoveryIndex::empty())
            .filter(card.path(), files, &null_sender())
            .unwrap();

        assert_eq!(outcome.new_files.len(), 1);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.size_prefiltered, 0);
        assert_eq!(
            outcome.new_files[0].content_hash(),
            Some(&ContentHash::of_bytes(b"BBBB"))
        );
    }

    #[test]
    fn known_content_is_skipped_under_any_name() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        seed(&store, b"AAAA");
        let files = vec![
            card_file(card.path(), "100CANON/IMG_0001.JPG", b"AAAA"),
            card_file(card.path(), "RENAMED.JPG", b"AAAA"),
        ];

        let outcome = filter(&store, RecoveryIndex::empty())
            .filter(card.path(), files, &null_sender())
            .unwrap();

        assert!(!outcome.has_new_content());
        assert_eq!(outcome.skipped, 2);
    }

    #[test]
    fn persistent_failures_are_skipped() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        let file = card_file(card.path(), "IMG_0001.JPG", b"AAAA");
        store
            .record_hash_failures(&[(file.path.clone(), 4), (file.path.clone(), 4)])
            .unwrap();

        let outcome = filter(&store, RecoveryIndex::empty())
            .filter(card.path(), vec![file], &null_sender())
            .unwrap();

        assert_eq!(outcome.skipped_failures, 1);
        assert!(outcome.new_files.is_empty());
    }

    #[test]
    fn unreadable_file_is_recorded_as_failure() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        seed(&store, b"AAAA");
        // Same size as a known file, so it must be hashed, but it is gone
        let ghost = MediaFile::new(
            card.path().join("IMG_0009.JPG"),
            PathBuf::from("IMG_0009.JPG"),
            4,
            SystemTime::UNIX_EPOCH,
            MediaKind::DerivationSource,
        );

        let outcome = filter(&store, RecoveryIndex::empty())
            .filter(card.path(), vec![ghost.clone()], &null_sender())
            .unwrap();

        assert_eq!(outcome.hash_errors, 1);
        assert!(!outcome.has_new_content());
        assert!(store.persistent_failures(1).unwrap().contains(&ghost.path));
    }

    #[test]
    fn hash_failure_with_volume_gone_is_fatal() {
        let card = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        seed(&store, b"AAAA");
        let unmounted = card.path().join("unmounted");
        let ghost = MediaFile::new(
            unmounted.join("IMG_0009.JPG"),
            PathBuf::from("IMG_0009.JPG"),
            4,
            SystemTime::UNIX_EPOCH,
            MediaKind::DerivationSource,
        );

        let result = filter(&store, RecoveryIndex::empty()).filter(&unmounted, vec![ghost], &null_sender());
        assert!(matches!(
            result,
            Err(crate::error::IngestError::Scan(ScanError::VolumeLost { .. }))
        ));
    }

    #[test]
    fn copied_file_in_incomplete_session_is_recovered_and_committed() {
        let card = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let store = InMemoryStore::new();

        let session = Session::create(home.path(), card.path()).unwrap();
        let hash = ContentHash::of_bytes(b"copied before crash");
        session
            .record_planned([(Path::new("IMG_0001.JPG"), Some(&hash), 19)])
            .unwrap();
        let local = session.layout().original_path(Path::new("IMG_0001.JPG")).unwrap();
        fs::write(&local, b"copied before crash").unwrap();

        let files = vec![
            card_file(card.path(), "IMG_0001.JPG", b"copied before crash"),
            card_file(card.path(), "IMG_0002.JPG", b"never copied"),
        ];

        let recovery = RecoveryIndex::load(home.path(), 5);
        let outcome = filter(&store, recovery)
            .filter(card.path(), files, &null_sender())
            .unwrap();

        assert_eq!(outcome.resume_session.as_ref(), Some(session.id()));
        assert_eq!(outcome.recovered.len(), 1);
        assert_eq!(outcome.new_files.len(), 1);
        assert!(store.lookup_many(&[hash]).unwrap().len() == 1);
    }

    #[test]
    fn changed_card_file_is_not_recovered() {
        let card = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let store = InMemoryStore::new();

        let session = Session::create(home.path(), card.path()).unwrap();
        session
            .record_planned([(Path::new("IMG_0001.JPG"), None, 4)])
            .unwrap();
        let local = session.layout().original_path(Path::new("IMG_0001.JPG")).unwrap();
        fs::write(&local, b"AAAA").unwrap();

        let files = vec![card_file(card.path(), "IMG_0001.JPG", b"BBBB")];
        let outcome = filter(&store, RecoveryIndex::load(home.path(), 5))
            .filter(card.path(), files, &null_sender())
            .unwrap();

        assert!(outcome.resume_session.is_none());
        assert_eq!(outcome.new_files.len(), 1);
    }
}
