//! `share.zip`: every share image of a session in one download.

use crate::core::derive::Variant;
use crate::core::session::{relative_key, SessionLayout};
use crate::error::SessionError;
use std::fs::File;
use std::io::Write;
use tracing::info;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Write `share.zip` from the session's share area. Returns the entry count.
///
/// Entries are named `share/<relpath>` in path order.
pub fn build_share_bundle(layout: &SessionLayout) -> Result<usize, SessionError> {
    let share_dir = layout.derived_dir(Variant::Share.dir_name());
    let bundle_path = layout.bundle_path();
    let bundle_err = |reason: String| SessionError::Bundle {
        path: bundle_path.clone(),
        reason,
    };

    let mut entries: Vec<_> = WalkDir::new(&share_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    entries.sort();

    let dir = layout.root();
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(tmp.reopen().map_err(|e| bundle_err(e.to_string()))?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &entries {
        let Ok(relative) = path.strip_prefix(&share_dir) else {
            continue;
        };
        let name = format!("share/{}", relative_key(relative));
        let bytes = std::fs::read(path).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        zip.start_file(name, options)
            .map_err(|e| bundle_err(e.to_string()))?;
        zip.write_all(&bytes).map_err(|e| bundle_err(e.to_string()))?;
    }

    let file: File = zip.finish().map_err(|e| bundle_err(e.to_string()))?;
    file.sync_all().map_err(|e| bundle_err(e.to_string()))?;
    drop(file);
    tmp.persist(&bundle_path)
        .map_err(|e| bundle_err(e.error.to_string()))?;

    info!(path = %bundle_path.display(), entries = entries.len(), "Built share bundle");
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn bundle_holds_share_images_only() {
        let dir = TempDir::new().unwrap();
        let layout = SessionLayout::new(dir.path());
        layout.create_dirs(&["share", "thumbs"]).unwrap();

        let share = layout.derived_dir("share");
        fs::create_dir_all(share.join("100CANON")).unwrap();
        fs::write(share.join("100CANON/IMG_0002.jpg"), b"two").unwrap();
        fs::write(share.join("100CANON/IMG_0001.jpg"), b"one").unwrap();
        fs::write(layout.derived_dir("thumbs").join("IMG_0001.jpg"), b"thumb").unwrap();

        assert_eq!(build_share_bundle(&layout).unwrap(), 2);

        let mut archive = zip::ZipArchive::new(File::open(layout.bundle_path()).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["share/100CANON/IMG_0001.jpg", "share/100CANON/IMG_0002.jpg"]);

        let mut content = String::new();
        std::io::Read::read_to_string(&mut archive.by_index(1).unwrap(), &mut content).unwrap();
        assert_eq!(content, "two");
    }

    #[test]
    fn empty_share_area_gives_empty_bundle() {
        let dir = TempDir::new().unwrap();
        let layout = SessionLayout::new(dir.path());
        layout.create_dirs(&["share"]).unwrap();

        assert_eq!(build_share_bundle(&layout).unwrap(), 0);
        assert!(layout.bundle_path().is_file());
    }
}
