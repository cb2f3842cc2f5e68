//! # Config Module
//!
//! Tunables for an ingest run. Defaults match a card reader on a small
//! single-board host; the CLI overrides them from flags and `CARD_INGEST_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Size and quality for one derived variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantParams {
    /// Longest edge in pixels. Images are only ever shrunk.
    pub max_long_edge: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl VariantParams {
    pub const SHARE: VariantParams = VariantParams {
        max_long_edge: 2048,
        quality: 90,
    };

    pub const THUMBNAIL: VariantParams = VariantParams {
        max_long_edge: 512,
        quality: 85,
    };
}

/// Configuration for an ingest run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root of local session directories
    pub sessions_dir: PathBuf,
    /// SQLite file holding the dedup, upload and failure tables
    pub db_path: PathBuf,
    /// Root prefix for all remote keys
    pub key_prefix: String,
    /// Lifetime of presigned URLs
    pub presign_ttl: Duration,
    pub share: VariantParams,
    pub thumbnail: VariantParams,
    /// Auto-refresh interval embedded in in-progress gallery documents
    pub poll_seconds: u32,
    pub hash_workers: usize,
    pub derive_workers: usize,
    pub upload_workers: usize,
    pub presign_workers: usize,
    /// Capacity of the derive -> upload channel
    pub upload_queue_depth: usize,
    /// Minimum spacing between progressive gallery republishes
    pub gallery_refresh_interval: Duration,
    /// How many recent sessions are consulted for crash recovery
    pub recovery_window: usize,
    /// Create a session even when every file was seen before
    pub always_create_session: bool,
    /// Files that failed to hash this many times are skipped on later runs
    pub failure_skip_threshold: u32,
    pub include_hidden: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            sessions_dir: home.join("card-ingest"),
            db_path: home.join(".card-ingest").join("ingest.db"),
            key_prefix: "sessions/".to_string(),
            presign_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            share: VariantParams::SHARE,
            thumbnail: VariantParams::THUMBNAIL,
            poll_seconds: 2,
            hash_workers: 4,
            derive_workers: default_derive_workers(),
            upload_workers: 4,
            presign_workers: 8,
            upload_queue_depth: 16,
            gallery_refresh_interval: Duration::from_secs(5),
            recovery_window: 5,
            always_create_session: false,
            failure_skip_threshold: 2,
            include_hidden: false,
        }
    }
}

fn default_derive_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 4)
}

impl IngestConfig {
    /// Config rooted under a single directory, used by tests and `--home`
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            sessions_dir: root.join("sessions"),
            db_path: root.join("ingest.db"),
            ..Self::default()
        }
    }

    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = dir.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_workers(mut self, derive: usize, upload: usize) -> Self {
        self.derive_workers = derive;
        self.upload_workers = upload;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.gallery_refresh_interval = interval;
        self
    }

    pub fn with_always_create_session(mut self, always: bool) -> Self {
        self.always_create_session = always;
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let workers = [
            ("hash_workers", self.hash_workers),
            ("derive_workers", self.derive_workers),
            ("upload_workers", self.upload_workers),
            ("presign_workers", self.presign_workers),
            ("upload_queue_depth", self.upload_queue_depth),
        ];
        for (name, value) in workers {
            if value == 0 {
                return Err(IngestError::Config(format!("{} must be at least 1", name)));
            }
        }

        for (name, params) in [("share", self.share), ("thumbnail", self.thumbnail)] {
            if params.max_long_edge == 0 {
                return Err(IngestError::Config(format!(
                    "{} long edge must be positive",
                    name
                )));
            }
            if !(1..=100).contains(&params.quality) {
                return Err(IngestError::Config(format!(
                    "{} quality must be between 1 and 100, got {}",
                    name, params.quality
                )));
            }
        }

        if self.thumbnail.max_long_edge > self.share.max_long_edge {
            return Err(IngestError::Config(
                "thumbnail long edge cannot exceed the share long edge".to_string(),
            ));
        }

        if self.presign_ttl.is_zero() {
            return Err(IngestError::Config("presign TTL must be positive".to_string()));
        }

        let prefix = self.key_prefix.trim();
        if prefix.is_empty() || prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(IngestError::Config(format!(
                "key prefix must be relative and end with '/', got '{}'",
                self.key_prefix
            )));
        }

        Ok(())
    }
}
