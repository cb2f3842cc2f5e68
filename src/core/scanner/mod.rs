//! # Scanner Module
//!
//! Enumerates media on a source volume and groups RAW+JPEG siblings.
//!
//! ## Supported Formats
//! - JPEG (.jpg, .jpeg) - derivation sources
//! - RAW (.arw, .cr2, .cr3, .nef, .dng, .raf, .rw2) - ingested as originals only
//!
//! ## Example
//! ```rust,ignore
//! use card_ingest::core::scanner::{MediaScanner, ScanConfig, WalkDirScanner};
//!
//! let scanner = WalkDirScanner::new(ScanConfig::default());
//! let result = scanner.scan(Path::new("/media/card/DCIM"))?;
//! ```

mod filter;
mod pairing;
mod walker;

pub use filter::MediaFilter;
pub use pairing::{pair_media, PairingGroup};
pub use walker::{ScanConfig, WalkDirScanner};

use crate::core::hasher::{hash_file, ContentHash};
use crate::error::{HashError, ScanError};
use crate::events::EventSender;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

/// What the pipeline does with a file beyond copying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// JPEG: produces share and thumbnail variants
    DerivationSource,
    /// RAW, or a JPEG that lost its group's source slot: copied only
    DerivationSkip,
    /// Not media; never returned by the scanner
    Unsupported,
}

impl MediaKind {
    pub const JPEG_EXTENSIONS: &'static [&'static str] = &["jpg", "jpeg"];
    pub const RAW_EXTENSIONS: &'static [&'static str] =
        &["arw", "cr2", "cr3", "nef", "dng", "raf", "rw2"];

    /// Classify from a file extension, case-insensitively
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if Self::JPEG_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::DerivationSource
        } else if Self::RAW_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::DerivationSkip
        } else {
            MediaKind::Unsupported
        }
    }

    pub fn classify(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(MediaKind::Unsupported)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MediaKind::Unsupported)
    }
}

/// Groups files that are the same shot in different formats
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingKey {
    pub parent: PathBuf,
    /// Lowercased file stem
    pub stem: String,
}

impl PairingKey {
    pub fn for_path(relative_path: &Path) -> Self {
        Self {
            parent: relative_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            stem: relative_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
        }
    }
}

/// A media file discovered on the source volume
#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Absolute path on the volume
    pub path: PathBuf,
    /// Path relative to the scan root; mirrored into the session
    pub relative_path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified time
    pub modified: SystemTime,
    pub kind: MediaKind,
    hash: OnceLock<ContentHash>,
}

impl MediaFile {
    pub fn new(
        path: PathBuf,
        relative_path: PathBuf,
        size: u64,
        modified: SystemTime,
        kind: MediaKind,
    ) -> Self {
        Self {
            path,
            relative_path,
            size,
            modified,
            kind,
            hash: OnceLock::new(),
        }
    }

    pub fn pairing_key(&self) -> PairingKey {
        PairingKey::for_path(&self.relative_path)
    }

    pub fn is_derivation_source(&self) -> bool {
        self.kind == MediaKind::DerivationSource
    }

    /// The hash if one has been computed or assigned
    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.hash.get()
    }

    /// Assign a hash computed elsewhere. The first assignment wins.
    pub fn set_hash(&self, hash: ContentHash) -> &ContentHash {
        self.hash.get_or_init(|| hash)
    }

    /// Return the hash, reading the file once if needed
    pub fn hash_or_compute(&self) -> Result<&ContentHash, HashError> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let computed = hash_file(&self.path)?;
        Ok(self.set_hash(computed))
    }
}

/// Result of a scan operation
#[derive(Debug)]
pub struct ScanResult {
    pub root: PathBuf,
    /// Discovered media, sorted by relative path
    pub files: Vec<MediaFile>,
    /// Number of (parent, stem) groups
    pub pairing_groups: usize,
    /// Errors that occurred during scanning (non-fatal)
    pub errors: Vec<ScanError>,
}

/// Trait for media scanners
pub trait MediaScanner: Send + Sync {
    /// Scan a volume root and return discovered media
    fn scan(&self, root: &Path) -> Result<ScanResult, ScanError>;

    /// Scan with progress reporting via events
    fn scan_with_events(&self, root: &Path, events: &EventSender)
        -> Result<ScanResult, ScanError>;
}
