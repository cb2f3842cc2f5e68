//! Crash recovery against recent incomplete sessions.
//!
//! If a run died after copying some originals but before committing their
//! records, the next run finds those files both on the card and in the
//! session's `originals/`. Matching them by (relative path, size) and then
//! by hash lets the run pick that session back up instead of copying the
//! same content into a second session.

use super::{list_sessions, relative_key, PlannedOriginal, SessionId, SessionLayout, SessionState};
use crate::core::hasher::ContentHash;
use crate::error::SessionError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

struct IncompleteSession {
    id: SessionId,
    layout: SessionLayout,
    planned: BTreeMap<String, PlannedOriginal>,
}

/// A volume file that may already be copied into an incomplete session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMatch {
    pub session: SessionId,
    /// The copy inside the session's originals area
    pub local_path: PathBuf,
    /// Hash recorded in the manifest when the file was planned, if any
    pub recorded_hash: Option<ContentHash>,
}

/// Incomplete sessions among the most recent few, newest first
pub struct RecoveryIndex {
    sessions: Vec<IncompleteSession>,
}

impl RecoveryIndex {
    pub fn load(sessions_dir: &Path, window: usize) -> Self {
        let sessions: Vec<IncompleteSession> = list_sessions(sessions_dir)
            .into_iter()
            .take(window)
            .filter(|(_, manifest)| manifest.state != SessionState::Done)
            .map(|(id, manifest)| IncompleteSession {
                layout: SessionLayout::new(sessions_dir.join(id.as_str())),
                id,
                planned: manifest.planned,
            })
            .collect();

        if !sessions.is_empty() {
            debug!(
                incomplete = sessions.len(),
                window, "Loaded recovery candidates"
            );
        }
        Self { sessions }
    }

    pub fn empty() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The newest session holding a complete copy of `relative` with this size
    pub fn find(&self, relative: &Path, size: u64) -> Option<RecoveryMatch> {
        let key = relative_key(relative);
        self.sessions.iter().find_map(|session| {
            let planned = session.planned.get(&key)?;
            if planned.size != size {
                return None;
            }
            let local_path = session.layout.original_path(relative).ok()?;
            let on_disk = std::fs::metadata(&local_path).ok()?;
            (on_disk.is_file() && on_disk.len() == size).then(|| RecoveryMatch {
                session: session.id.clone(),
                local_path,
                recorded_hash: planned.hash.clone(),
            })
        })
    }
}

/// Move sessions left mid-lifecycle among the newest `window` to `error`.
///
/// They stay recovery candidates; a later run of their card resumes them.
pub fn fail_stale_sessions(
    sessions_dir: &Path,
    window: usize,
    message: &str,
) -> Result<Vec<SessionId>, SessionError> {
    let mut failed = Vec::new();
    for (id, mut manifest) in list_sessions(sessions_dir).into_iter().take(window) {
        if manifest.state.is_terminal() {
            continue;
        }
        let layout = SessionLayout::new(sessions_dir.join(id.as_str()));
        info!(session = %id, from = %manifest.state, "Marking stale session as failed");
        manifest.state = SessionState::Error;
        manifest.error = Some(message.to_string());
        manifest.updated_at = chrono::Utc::now();
        manifest.save(&layout.manifest_path())?;
        failed.push(id);
    }
    Ok(failed)
}
