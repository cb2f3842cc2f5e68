//! # Core Module
//!
//! The session ingestion engine, independent of any front end.
//!
//! ## Modules
//! - `scanner` - Discovers media on a volume and pairs RAW+JPEG
//! - `hasher` - SHA-256 content hashes
//! - `store` - Persistent dedup, upload and failure indexes
//! - `dedup` - Two-phase new-content filter with crash recovery
//! - `session` - Session lifecycle, layout and the copy stage
//! - `metadata` - Capture metadata from EXIF
//! - `derive` - Share and thumbnail variants
//! - `remote` - Object store capability and backends
//! - `upload` - Idempotent artifact uploads
//! - `bundle` - `share.zip` of a session
//! - `gallery` - Presigning and gallery documents
//! - `pipeline` - Orchestrates the full workflow

pub mod bundle;
pub mod dedup;
pub mod derive;
pub mod gallery;
pub mod hasher;
pub mod metadata;
pub mod pipeline;
pub mod remote;
pub mod scanner;
pub mod session;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use hasher::ContentHash;
pub use metadata::CaptureMetadata;
pub use pipeline::{IngestOutcome, IngestPipeline, SessionReport};
pub use scanner::{MediaFile, MediaKind};
pub use session::{SessionId, SessionState};
