//! File filtering logic for the scanner.

use super::MediaKind;
use std::path::Path;

/// Decides which directory entries are media worth ingesting
pub struct MediaFilter {
    /// Whether to include hidden files and directories
    include_hidden: bool,
}

impl MediaFilter {
    pub fn new() -> Self {
        Self {
            include_hidden: false,
        }
    }

    /// Include hidden entries (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Whether a name should be skipped as hidden
    pub fn is_hidden(&self, path: &Path) -> bool {
        if self.include_hidden {
            return false;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
    }

    /// Check if a file should be included
    pub fn should_include(&self, path: &Path) -> bool {
        !self.is_hidden(path) && self.classify(path).is_supported()
    }

    pub fn classify(&self, path: &Path) -> MediaKind {
        MediaKind::classify(path)
    }
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self::new()
    }
}
