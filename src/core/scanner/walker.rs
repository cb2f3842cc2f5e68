//! Directory walking implementation using walkdir.

use super::{filter::MediaFilter, pair_media, MediaFile, MediaScanner, ScanResult};
use crate::error::ScanError;
use crate::events::{Event, EventSender, ScanEvent, ScanProgress};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Configuration for the volume scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Whether to include hidden files and directories
    pub include_hidden: bool,
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    config: ScanConfig,
    filter: MediaFilter,
}

impl WalkDirScanner {
    pub fn new(config: ScanConfig) -> Self {
        let filter = MediaFilter::new().with_hidden(config.include_hidden);
        Self { config, filter }
    }

    fn volume_lost(root: &Path, reason: impl Into<String>) -> ScanError {
        ScanError::VolumeLost {
            path: root.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// `Err` once the root can no longer be listed
    fn check_root(root: &Path) -> Result<(), ScanError> {
        fs::read_dir(root)
            .map(|_| ())
            .map_err(|e| Self::volume_lost(root, e.to_string()))
    }
}

impl MediaScanner for WalkDirScanner {
    fn scan(&self, root: &Path) -> Result<ScanResult, ScanError> {
        self.scan_with_events(root, &crate::events::null_sender())
    }

    fn scan_with_events(&self, root: &Path, events: &EventSender) -> Result<ScanResult, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }

        events.send(Event::Scan(ScanEvent::Started {
            root: root.to_path_buf(),
        }));

        let mut files = Vec::new();
        let mut errors = Vec::new();
        let mut directories_scanned = 0;

        let walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.filter.is_hidden(entry.path()));

        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    // An unreadable entry is only fatal when the whole volume went away
                    Self::check_root(root)?;

                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    let error = if e.io_error().map(|e| e.kind())
                        == Some(std::io::ErrorKind::PermissionDenied)
                    {
                        ScanError::PermissionDenied { path: path.clone() }
                    } else {
                        ScanError::ReadDirectory {
                            path: path.clone(),
                            source: std::io::Error::other(e.to_string()),
                        }
                    };
                    warn!(path = %path.display(), error = %error, "Skipping unreadable entry");
                    events.send(Event::Scan(ScanEvent::Error {
                        path,
                        message: error.to_string(),
                    }));
                    errors.push(error);
                    continue;
                }
            };

            let path = entry.path();

            if entry.file_type().is_dir() {
                directories_scanned += 1;
                events.send(Event::Scan(ScanEvent::Progress(ScanProgress {
                    directories_scanned,
                    files_found: files.len(),
                    current_path: path.to_path_buf(),
                })));
                continue;
            }

            if !self.filter.should_include(path) {
                continue;
            }

            let relative_path = match path.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };

            match entry.metadata() {
                Ok(metadata) => {
                    debug!(path = %relative_path.display(), size = metadata.len(), "Found media");
                    files.push(MediaFile::new(
                        path.to_path_buf(),
                        relative_path,
                        metadata.len(),
                        metadata
                            .modified()
                            .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                        self.filter.classify(path),
                    ));
                }
                Err(e) => {
                    Self::check_root(root)?;
                    let error = ScanError::ReadDirectory {
                        path: path.to_path_buf(),
                        source: std::io::Error::other(e.to_string()),
                    };
                    events.send(Event::Scan(ScanEvent::Error {
                        path: path.to_path_buf(),
                        message: error.to_string(),
                    }));
                    errors.push(error);
                }
            }
        }

        // A card pulled during the walk can end iteration early without an error
        Self::check_root(root)?;

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let groups = pair_media(&mut files);

        info!(
            root = %root.display(),
            files = files.len(),
            groups = groups.len(),
            errors = errors.len(),
            "Scan complete"
        );
        events.send(Event::Scan(ScanEvent::Completed {
            total_files: files.len(),
            pairing_groups: groups.len(),
        }));

        Ok(ScanResult {
            root: root.to_path_buf(),
            files,
            pairing_groups: groups.len(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::MediaKind;
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(&path).unwrap();
        file.write_all(name.as_bytes()).unwrap();
        path
    }

    #[test]
    fn scan_empty_directory_returns_empty_vec() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = WalkDirScanner::new(ScanConfig::default());

        let result = scanner.scan(temp_dir.path()).unwrap();

        assert!(result.files.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.pairing_groups, 0);
    }

    #[test]
    fn scan_records_relative_paths_sorted() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "101CANON/IMG_0002.JPG");
        create_file(temp_dir.path(), "100CANON/IMG_0001.JPG");

        let scanner = WalkDirScanner::new(ScanConfig::default());
        let result = scanner.scan(temp_dir.path()).unwrap();

        let rels: Vec<_> = result.files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(
            rels,
            vec![
                PathBuf::from("100CANON/IMG_0001.JPG"),
                PathBuf::from("101CANON/IMG_0002.JPG")
            ]
        );
        assert_eq!(result.files[0].size, "100CANON/IMG_0001.JPG".len() as u64);
    }

    #[test]
    fn scan_excludes_non_media_files() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "IMG_0001.JPG");
        create_file(temp_dir.path(), "IMG_0001.XMP");
        create_file(temp_dir.path(), "MVI_0002.MP4");

        let scanner = WalkDirScanner::new(ScanConfig::default());
        let result = scanner.scan(temp_dir.path()).unwrap();

        assert_eq!(result.files.len(), 1);
    }

    #[test]
    fn scan_pairs_raw_with_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "IMG_0001.CR3");
        create_file(temp_dir.path(), "IMG_0001.JPG");
        create_file(temp_dir.path(), "IMG_0002.CR3");

        let scanner = WalkDirScanner::new(ScanConfig::default());
        let result = scanner.scan(temp_dir.path()).unwrap();

        assert_eq!(result.files.len(), 3);
        assert_eq!(result.pairing_groups, 2);
        let sources: Vec<_> = result
            .files
            .iter()
            .filter(|f| f.kind == MediaKind::DerivationSource)
            .collect();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].relative_path.ends_with("IMG_0001.JPG"));
    }

    #[test]
    fn scan_skips_hidden_directories() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "IMG_0001.JPG");
        create_file(temp_dir.path(), ".Trashes/IMG_0009.JPG");

        let scanner = WalkDirScanner::new(ScanConfig::default());
        assert_eq!(scanner.scan(temp_dir.path()).unwrap().files.len(), 1);

        let scanner = WalkDirScanner::new(ScanConfig {
            include_hidden: true,
            ..Default::default()
        });
        assert_eq!(scanner.scan(temp_dir.path()).unwrap().files.len(), 2);
    }

    #[test]
    fn scan_nonexistent_directory_returns_error() {
        let scanner = WalkDirScanner::new(ScanConfig::default());
        let result = scanner.scan(Path::new("/nonexistent/card/12345"));

        assert!(matches!(result, Err(ScanError::DirectoryNotFound { .. })));
    }
}
