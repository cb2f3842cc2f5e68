//! `session.json`: the durable record of a session's progress.

use super::{SessionCounts, SessionState};
use crate::core::hasher::ContentHash;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// An original the session intends to hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOriginal {
    /// Known when the file was hashed during dedup; otherwise computed while copying
    pub hash: Option<ContentHash>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_root: Option<PathBuf>,
    #[serde(default)]
    pub counts: SessionCounts,
    /// Keyed by forward-slash relative path
    #[serde(default)]
    pub planned: BTreeMap<String, PlannedOriginal>,
    pub share_url: Option<String>,
    pub error: Option<String>,
}

impl SessionManifest {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            state: SessionState::Scanning,
            created_at: now,
            updated_at: now,
            source_root: None,
            counts: SessionCounts::default(),
            planned: BTreeMap::new(),
            share_url: None,
            error: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SessionError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write via a temp file in the same directory so readers never see half a manifest
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_vec_pretty(self).map_err(|e| SessionError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn manifest_round_trips_planned_originals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let mut manifest = SessionManifest::new("shoot-2024-05-01_101500_000001");
        manifest.state = SessionState::Copying;
        manifest.planned.insert(
            "100CANON/IMG_0001.JPG".to_string(),
            PlannedOriginal {
                hash: Some(ContentHash::of_bytes(b"one")),
                size: 3,
            },
        );
        manifest.save(&path).unwrap();

        let loaded = SessionManifest::load(&path).unwrap();
        assert_eq!(loaded.state, SessionState::Copying);
        assert_eq!(loaded.planned, manifest.planned);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"state\": \"copying\""));
    }

    #[test]
    fn unreadable_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            SessionManifest::load(&path),
            Err(SessionError::Manifest { .. })
        ));
    }
}
