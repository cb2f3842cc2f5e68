//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the ingest pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Volume enumeration events
    Scan(ScanEvent),
    /// Dedup filter (hashing) events
    Hash(HashEvent),
    /// Session lifecycle events
    Session(SessionEvent),
    /// Copy stage events
    Copy(CopyEvent),
    /// Derivation worker events
    Derive(DeriveEvent),
    /// Upload worker events
    Upload(UploadEvent),
    /// Gallery publication events
    Gallery(GalleryEvent),
    /// Pipeline-level events
    Pipeline(PipelineEvent),
}

/// Events during the scanning phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Scanning has started
    Started { root: PathBuf },
    /// Progress update during scanning
    Progress(ScanProgress),
    /// An entry could not be read but scanning continues
    Error { path: PathBuf, message: String },
    /// Scanning completed
    Completed {
        total_files: usize,
        pairing_groups: usize,
    },
}

/// Progress information during scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Number of directories scanned so far
    pub directories_scanned: usize,
    /// Number of media files found so far
    pub files_found: usize,
    /// Current directory being scanned
    pub current_path: PathBuf,
}

/// Events during content hashing and dedup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HashEvent {
    /// Hashing has started
    Started {
        total_files: usize,
        /// Files whose size was never seen before
        size_prefiltered: usize,
    },
    /// Progress update during hashing
    Progress(HashProgress),
    /// A file could not be hashed; it is treated as not new this run
    Error { path: PathBuf, message: String },
    /// Dedup completed
    Completed {
        new_files: usize,
        skipped: usize,
        recovered: usize,
    },
}

/// Progress information during hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashProgress {
    /// Number of files hashed so far
    pub completed: usize,
    /// Total number of files to hash
    pub total: usize,
    /// File just hashed
    pub current_path: PathBuf,
}

/// Session lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A new session directory was created
    Created { session_id: String, path: PathBuf },
    /// An incomplete session was picked up again
    Resumed { session_id: String },
    /// The session moved to a new state
    StateChanged { session_id: String, state: String },
    /// The share link changed (placeholder or final gallery)
    ShareLink { session_id: String, url: String },
}

/// Events during the copy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CopyEvent {
    /// Copying has started
    Started { total_files: usize },
    /// One original landed in the session
    FileCopied { relative_path: PathBuf, bytes: u64 },
    /// A file could not be copied; the session continues
    Error { path: PathBuf, message: String },
    /// Copying completed
    Completed {
        copied: usize,
        already_present: usize,
        failed: usize,
    },
}

/// Events from derivation workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeriveEvent {
    /// Derivation has started
    Started { total_sources: usize },
    /// A variant was written (or reused) on disk
    ArtifactReady {
        relative_path: PathBuf,
        variant: String,
    },
    /// A source could not be derived
    Error { path: PathBuf, message: String },
}

/// Events from upload workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    /// Bytes were transferred
    Uploaded { key: String, bytes: u64 },
    /// The remote already holds identical content
    Unchanged { key: String },
    /// Upload failed after retries
    Error { key: String, message: String },
}

/// Gallery publication events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GalleryEvent {
    /// A gallery document was uploaded
    Published {
        key: String,
        item_count: usize,
        is_final: bool,
    },
    /// A progressive republish failed; the previous document stays live
    Error { message: String },
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Pipeline has started
    Started,
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase },
    /// Every file on the volume was ingested before; no session created
    NoNewContent { discovered: usize, skipped: usize },
    /// Pipeline completed successfully
    Completed { summary: PipelineSummary },
    /// Pipeline encountered a fatal error
    Error { message: String },
}

/// Phases of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Scanning,
    Hashing,
    Copying,
    Processing,
    Publishing,
}

/// Summary of a completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub session_id: String,
    /// Media files found on the volume
    pub discovered: usize,
    /// Files copied into the session
    pub new_files: usize,
    /// Files already ingested by an earlier run
    pub skipped: usize,
    /// Sources that produced both variants
    pub processed: usize,
    /// Artifacts transferred to the remote store
    pub uploaded: usize,
    /// Artifacts the remote already held
    pub upload_unchanged: usize,
    /// Per-file errors across all stages
    pub errors: usize,
    /// Final share link
    pub share_url: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Scanning => write!(f, "Scanning"),
            PipelinePhase::Hashing => write!(f, "Hashing"),
            PipelinePhase::Copying => write!(f, "Copying"),
            PipelinePhase::Processing => write!(f, "Processing"),
            PipelinePhase::Publishing => write!(f, "Publishing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_serializable() {
        let event = Event::Upload(UploadEvent::Uploaded {
            key: "sessions/shoot-2024-01-01_120000_000000/share/DSC_0001.JPG.jpg".to_string(),
            bytes: 2048,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        match deserialized {
            Event::Upload(UploadEvent::Uploaded { bytes, key }) => {
                assert_eq!(bytes, 2048);
                assert!(key.ends_with(".jpg"));
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn pipeline_summary_is_serializable() {
        let summary = PipelineSummary {
            session_id: "shoot-2024-01-01_120000_000000".to_string(),
            discovered: 10,
            new_files: 10,
            skipped: 0,
            processed: 6,
            uploaded: 12,
            upload_unchanged: 0,
            errors: 0,
            share_url: "file:///bucket/index.html?expires=1".to_string(),
            duration_ms: 5000,
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("shoot-2024-01-01_120000_000000"));
        assert!(json.contains("\"uploaded\":12"));
    }

    #[test]
    fn phases_display_as_words() {
        assert_eq!(PipelinePhase::Processing.to_string(), "Processing");
    }
}
