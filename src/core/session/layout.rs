//! On-disk layout of a session directory.

use crate::error::SessionError;
use std::path::{Component, Path, PathBuf};

const ORIGINALS_DIR: &str = "originals";
const DERIVED_DIR: &str = "derived";
const MANIFEST_FILE: &str = "session.json";
const BUNDLE_FILE: &str = "share.zip";
const SHARE_LINK_FILE: &str = "share.txt";

/// Paths inside `<sessions_dir>/<id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.root.join(ORIGINALS_DIR)
    }

    /// `derived/<variant_dir>`, e.g. `derived/share`
    pub fn derived_dir(&self, variant_dir: &str) -> PathBuf {
        self.root.join(DERIVED_DIR).join(variant_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(BUNDLE_FILE)
    }

    pub fn share_link_path(&self) -> PathBuf {
        self.root.join(SHARE_LINK_FILE)
    }

    /// Where an original lands inside the session
    pub fn original_path(&self, relative: &Path) -> Result<PathBuf, SessionError> {
        Ok(self.originals_dir().join(safe_relative(relative)?))
    }

    /// Where a derived variant of an original lands
    pub fn derived_path(&self, variant_dir: &str, relative: &Path) -> Result<PathBuf, SessionError> {
        Ok(self
            .derived_dir(variant_dir)
            .join(derived_relative(relative)?))
    }

    /// Create every fixed directory
    pub fn create_dirs(&self, variant_dirs: &[&str]) -> Result<(), SessionError> {
        let mut dirs = vec![self.originals_dir()];
        dirs.extend(variant_dirs.iter().map(|v| self.derived_dir(v)));
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|source| SessionError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

/// Reject paths that could escape the session directory
pub fn safe_relative(relative: &Path) -> Result<PathBuf, SessionError> {
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SessionError::UnsafePath {
                    path: relative.to_path_buf(),
                })
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SessionError::UnsafePath {
            path: relative.to_path_buf(),
        });
    }
    Ok(clean)
}

/// Relative path of a derived JPEG: the original's path with a `.jpg` extension
pub fn derived_relative(relative: &Path) -> Result<PathBuf, SessionError> {
    Ok(safe_relative(relative)?.with_extension("jpg"))
}

/// Forward-slash form of a relative path, for keys and manifests
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_fixed() {
        let layout = SessionLayout::new("/home/pi/card-ingest/shoot-x");
        assert_eq!(
            layout.original_path(Path::new("100CANON/IMG_0001.CR3")).unwrap(),
            PathBuf::from("/home/pi/card-ingest/shoot-x/originals/100CANON/IMG_0001.CR3")
        );
        assert_eq!(
            layout.derived_path("thumbs", Path::new("100CANON/IMG_0001.JPG")).unwrap(),
            PathBuf::from("/home/pi/card-ingest/shoot-x/derived/thumbs/100CANON/IMG_0001.jpg")
        );
        assert!(layout.manifest_path().ends_with("session.json"));
        assert!(layout.bundle_path().ends_with("share.zip"));
        assert!(layout.share_link_path().ends_with("share.txt"));
    }

    #[test]
    fn parent_components_are_rejected() {
        assert!(safe_relative(Path::new("../etc/passwd")).is_err());
        assert!(safe_relative(Path::new("DCIM/../../x.jpg")).is_err());
        assert!(safe_relative(Path::new("/abs/x.jpg")).is_err());
        assert!(safe_relative(Path::new("")).is_err());
        assert_eq!(
            safe_relative(Path::new("./DCIM/x.jpg")).unwrap(),
            PathBuf::from("DCIM/x.jpg")
        );
    }

    #[test]
    fn relative_key_uses_forward_slashes() {
        let rel: PathBuf = ["100CANON", "IMG_0001.jpg"].iter().collect();
        assert_eq!(relative_key(&rel), "100CANON/IMG_0001.jpg");
    }
}
