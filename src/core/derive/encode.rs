//! JPEG encoding and atomic output writes.

use crate::error::DeriveError;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use std::io::Write;
use std::path::Path;

/// Encode as baseline JPEG. The output carries no EXIF.
pub fn encode_jpeg(image: &RgbImage, quality: u8, path: &Path) -> Result<Vec<u8>, DeriveError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .map_err(|e| DeriveError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(bytes)
}

/// Write through a temp file so a crash never leaves a truncated artifact
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), DeriveError> {
    let io_err = |source| DeriveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
