//! # Session Module
//!
//! A session is one ingest of new content: a directory under
//! `sessions_dir` holding the copied originals, their derived variants and
//! a `session.json` manifest.
//!
//! ## Lifecycle
//! `scanning -> copying -> deriving -> publishing -> done`, with `error`
//! reachable from any live state. Transitions are persisted before the
//! next stage starts so a crash leaves an accurate manifest behind.
//!
//! ## Layout
//! ```text
//! <sessions_dir>/<id>/
//!   originals/<relpath>
//!   derived/share/<relpath>.jpg
//!   derived/thumbs/<relpath>.jpg
//!   session.json
//!   share.zip
//!   share.txt
//! ```

mod copy;
mod layout;
mod manifest;
mod recovery;
mod state;

pub use copy::{CopyOutcome, CopyReport, CopyStage};
pub use layout::{derived_relative, relative_key, safe_relative, SessionLayout};
pub use manifest::{PlannedOriginal, SessionManifest};
pub use recovery::{fail_stale_sessions, RecoveryIndex, RecoveryMatch};
pub use state::SessionState;

use crate::core::derive::Variant;
use crate::core::hasher::ContentHash;
use crate::error::SessionError;
use chrono::{Local, NaiveDateTime, TimeDelta};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info};

const ID_FORMAT: &str = "%Y-%m-%d_%H%M%S_%6f";

/// `shoot-YYYY-MM-DD_HHMMSS_ffffff`, local time, strictly increasing within a process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        static LAST: Mutex<Option<NaiveDateTime>> = Mutex::new(None);

        let mut last = LAST.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Local::now().naive_local();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + TimeDelta::microseconds(1);
            }
        }
        *last = Some(now);

        Self(format!("shoot-{}", now.format(ID_FORMAT)))
    }

    pub fn parse(value: &str) -> Result<Self, SessionError> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| Regex::new(r"^shoot-\d{4}-\d{2}-\d{2}_\d{6}_\d{6}$").ok());

        if pattern.as_ref().is_some_and(|re| re.is_match(value)) {
            Ok(Self(value.to_string()))
        } else {
            Err(SessionError::InvalidId {
                id: value.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub discovered: usize,
    pub new_files: usize,
    pub skipped: usize,
    pub processed: usize,
    pub uploaded: usize,
    pub upload_unchanged: usize,
    pub errors: usize,
}

/// Live counters, shared by every worker of a session
#[derive(Debug, Default)]
pub struct SessionCounters {
    discovered: AtomicUsize,
    new_files: AtomicUsize,
    skipped: AtomicUsize,
    processed: AtomicUsize,
    uploaded: AtomicUsize,
    upload_unchanged: AtomicUsize,
    errors: AtomicUsize,
}

impl SessionCounters {
    pub fn add_discovered(&self, n: usize) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_new(&self, n: usize) {
        self.new_files.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, n: usize) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_processed(&self, n: usize) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_uploaded(&self, n: usize) {
        self.uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_upload_unchanged(&self, n: usize) {
        self.upload_unchanged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: usize) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionCounts {
        SessionCounts {
            discovered: self.discovered.load(Ordering::Relaxed),
            new_files: self.new_files.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            upload_unchanged: self.upload_unchanged.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// An open session
pub struct Session {
    id: SessionId,
    layout: SessionLayout,
    manifest: Mutex<SessionManifest>,
    counters: SessionCounters,
}

impl Session {
    /// Materialize a fresh session directory
    pub fn create(sessions_dir: &Path, source_root: &Path) -> Result<Self, SessionError> {
        std::fs::create_dir_all(sessions_dir).map_err(|source| SessionError::Io {
            path: sessions_dir.to_path_buf(),
            source,
        })?;

        // Another process may have claimed the same id; take the next one
        let (id, root) = loop {
            let id = SessionId::generate();
            let root = sessions_dir.join(id.as_str());
            match std::fs::create_dir(&root) {
                Ok(()) => break (id, root),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SessionError::Io { path: root, source }),
            }
        };

        let layout = SessionLayout::new(root);
        layout.create_dirs(&Variant::ALL.map(|v| v.dir_name()))?;

        let mut manifest = SessionManifest::new(id.as_str());
        manifest.source_root = Some(source_root.to_path_buf());
        manifest.save(&layout.manifest_path())?;

        info!(session = %id, path = %layout.root().display(), "Created session");
        Ok(Self {
            id,
            layout,
            manifest: Mutex::new(manifest),
            counters: SessionCounters::default(),
        })
    }

    /// Reopen an incomplete session. It restarts at `scanning` with a clean error.
    pub fn resume(sessions_dir: &Path, id: &SessionId) -> Result<Self, SessionError> {
        let layout = SessionLayout::new(sessions_dir.join(id.as_str()));
        let mut manifest = SessionManifest::load(&layout.manifest_path())?;
        if manifest.state == SessionState::Done {
            return Err(SessionError::InvalidTransition {
                from: manifest.state.to_string(),
                to: SessionState::Scanning.to_string(),
            });
        }

        layout.create_dirs(&Variant::ALL.map(|v| v.dir_name()))?;
        manifest.state = SessionState::Scanning;
        manifest.error = None;
        manifest.updated_at = chrono::Utc::now();
        manifest.save(&layout.manifest_path())?;

        info!(session = %id, "Resumed session");
        Ok(Self {
            id: id.clone(),
            layout,
            manifest: Mutex::new(manifest),
            counters: SessionCounters::default(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn manifest(&self) -> SessionManifest {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionManifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, manifest: &mut SessionManifest) -> Result<(), SessionError> {
        manifest.counts = self.counters.snapshot();
        manifest.updated_at = chrono::Utc::now();
        manifest.save(&self.layout.manifest_path())
    }

    /// Move to the next state and persist it
    pub fn advance(&self, next: SessionState) -> Result<(), SessionError> {
        let mut manifest = self.lock();
        if !manifest.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: manifest.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(session = %self.id, from = %manifest.state, to = %next, "Session transition");
        manifest.state = next;
        self.persist(&mut manifest)
    }

    /// Mark the session failed. No-op once terminal.
    pub fn fail(&self, message: &str) -> Result<(), SessionError> {
        let mut manifest = self.lock();
        if manifest.state.is_terminal() {
            return Ok(());
        }
        manifest.state = SessionState::Error;
        manifest.error = Some(message.to_string());
        self.persist(&mut manifest)
    }

    /// Record the originals this session is about to hold
    pub fn record_planned<'a, I>(&self, files: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = (&'a Path, Option<&'a ContentHash>, u64)>,
    {
        let mut manifest = self.lock();
        for (relative, hash, size) in files {
            let entry = manifest
                .planned
                .entry(relative_key(relative))
                .or_insert(PlannedOriginal { hash: None, size });
            entry.size = size;
            if let Some(hash) = hash {
                entry.hash = Some(hash.clone());
            }
        }
        self.persist(&mut manifest)
    }

    /// Persist the current share link to the manifest and `share.txt`
    pub fn set_share_url(&self, url: &str) -> Result<(), SessionError> {
        let path = self.layout.share_link_path();
        std::fs::write(&path, format!("{}\n", url))
            .map_err(|source| SessionError::Io { path, source })?;

        let mut manifest = self.lock();
        manifest.share_url = Some(url.to_string());
        self.persist(&mut manifest)
    }

    /// Flush counters to the manifest
    pub fn checkpoint(&self) -> Result<(), SessionError> {
        let mut manifest = self.lock();
        self.persist(&mut manifest)
    }
}

/// Sessions under `sessions_dir`, newest first. Unreadable manifests are skipped.
pub fn list_sessions(sessions_dir: &Path) -> Vec<(SessionId, SessionManifest)> {
    let Ok(entries) = std::fs::read_dir(sessions_dir) else {
        return Vec::new();
    };

    let mut sessions: Vec<(SessionId, SessionManifest)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let id = SessionId::parse(&name.to_string_lossy()).ok()?;
            let manifest_path: PathBuf = entry.path().join("session.json");
            let manifest = SessionManifest::load(&manifest_path).ok()?;
            Some((id, manifest))
        })
        .collect();

    sessions.sort_by(|a, b| b.0.cmp(&a.0));
    sessions
}
