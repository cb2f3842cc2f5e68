//! # Error Module
//!
//! Error types for the ingest pipeline.
//!
//! ## Design Principles
//! - **Per-file problems are data** - they are counted on the session, not raised
//! - **Only catastrophic failures propagate** - lost volume, unreachable store
//! - **Include context** - paths, keys, what went wrong
//! - **Recovery hints** - suggest how to fix when possible

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Index error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Derivation error: {0}")]
    Derive(#[from] DeriveError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage-aborting failure. The session (if one exists) is left in `error`.
    #[error("Ingest aborted during {stage}{}: {message}", session_suffix(.session))]
    Fatal {
        stage: String,
        session: Option<String>,
        message: String,
    },
}

fn session_suffix(session: &Option<String>) -> String {
    session
        .as_ref()
        .map(|id| format!(" of session {}", id))
        .unwrap_or_default()
}

impl IngestError {
    /// Build a fatal error for a stage
    pub fn fatal(stage: impl Into<String>, session: Option<&str>, message: impl Into<String>) -> Self {
        IngestError::Fatal {
            stage: stage.into(),
            session: session.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Errors that occur while enumerating the source volume
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Source directory not found: {path}. Re-insert the card and wait for it to mount.")]
    DirectoryNotFound { path: PathBuf },

    #[error("Source volume became inaccessible at {path}: {reason}. The card may have been removed; nothing was ingested from this partial scan.")]
    VolumeLost { path: PathBuf, reason: String },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while computing content hashes
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Failed to read {path} for hashing: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start hash workers: {0}")]
    Pool(String),
}

/// Errors from the persistent dedup/upload indexes
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open index database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Index query failed: {0}")]
    QueryFailed(String),

    #[error("Index lock poisoned for {path}. Restart the process; if it persists, check the database file.")]
    Corrupted { path: PathBuf },

    #[error("Stored value is malformed: {0}")]
    Malformed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

/// Errors from the remote object store capability
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Worth retrying: network blips, throttling, timeouts
    #[error("Transient failure for {key}: {reason}")]
    Transient { key: String, reason: String },

    /// The store refused the request; retrying will not help
    #[error("Request for {key} rejected: {reason}. Check credentials and bucket permissions.")]
    Rejected { key: String, reason: String },

    #[error("Remote store unreachable: {reason}. Check network connectivity.")]
    Unreachable { reason: String },

    #[error("Failed to presign {key}: {reason}")]
    Presign { key: String, reason: String },

    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    #[error("Failed to read local file {path} for upload: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Whether the transport retry policy should try again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient { .. } | RemoteError::Unreachable { .. }
        )
    }
}

/// Errors that occur while producing derived images
#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("Image {path} has invalid dimensions")]
    InvalidDimensions { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors tied to the session's local layout and lifecycle
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session manifest {path} is unreadable: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Refusing unsafe relative path: {path}")]
    UnsafePath { path: PathBuf },

    #[error("Invalid session id: {id}")]
    InvalidId { id: String },

    #[error("Failed to build bundle {path}: {reason}")]
    Bundle { path: PathBuf, reason: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, IngestError>;
