//! # Derive Module
//!
//! Produces the share and thumbnail variants of a JPEG original.
//!
//! ## Steps
//! 1. Read the source once; take capture metadata from its EXIF
//! 2. Decode (zune-jpeg, image crate fallback) and apply orientation
//! 3. Shrink to the share bound and encode; the thumbnail is cut from the share image
//! 4. Write each variant atomically and hand it to the caller immediately
//!
//! Variants already on disk (a resumed session) are reused as-is.

mod decode;
mod encode;
mod resize;

pub use decode::{apply_orientation, decode_rgb};
pub use encode::{encode_jpeg, write_atomically};
pub use resize::{target_dimensions, FastResizer};

use crate::config::VariantParams;
use crate::core::metadata::{extract_metadata, extract_metadata_from_bytes, CaptureMetadata};
use crate::core::session::SessionLayout;
use crate::error::DeriveError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which derived image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Share,
    Thumbnail,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Share, Variant::Thumbnail];

    /// Directory name under `derived/` and in remote keys
    pub fn dir_name(&self) -> &'static str {
        match self {
            Variant::Share => "share",
            Variant::Thumbnail => "thumbs",
        }
    }
}

/// A variant written to the session's derived area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedArtifact {
    pub variant: Variant,
    /// Relative path of the original it was derived from
    pub source_relative: PathBuf,
    pub local_path: PathBuf,
    pub params: VariantParams,
    /// Found on disk from an earlier run rather than encoded now
    pub reused: bool,
}

/// Derives variants for one source at a time
pub struct Deriver {
    share: VariantParams,
    thumbnail: VariantParams,
    resizer: FastResizer,
}

impl Deriver {
    pub fn new(share: VariantParams, thumbnail: VariantParams) -> Self {
        Self {
            share,
            thumbnail,
            resizer: FastResizer::new(),
        }
    }

    /// Derive both variants of `source_path`, calling `on_artifact` as each lands.
    ///
    /// Returns the source's capture metadata. An error after the share image
    /// was handed off still leaves that artifact delivered.
    pub fn derive<F>(
        &mut self,
        source_path: &Path,
        relative: &Path,
        layout: &SessionLayout,
        mut on_artifact: F,
    ) -> Result<CaptureMetadata, DeriveError>
    where
        F: FnMut(DerivedArtifact),
    {
        let path_err = |e: crate::error::SessionError| DeriveError::Encode {
            path: source_path.to_path_buf(),
            reason: e.to_string(),
        };
        let share_path = layout
            .derived_path(Variant::Share.dir_name(), relative)
            .map_err(path_err)?;
        let thumb_path = layout
            .derived_path(Variant::Thumbnail.dir_name(), relative)
            .map_err(path_err)?;

        let artifact = |variant: Variant, local_path: &Path, params, reused| DerivedArtifact {
            variant,
            source_relative: relative.to_path_buf(),
            local_path: local_path.to_path_buf(),
            params,
            reused,
        };

        let mut metadata = None;
        let mut share_image: Option<RgbImage> = None;

        if share_path.is_file() {
            debug!(path = %share_path.display(), "Reusing share image");
            on_artifact(artifact(Variant::Share, &share_path, self.share, true));
        } else {
            let bytes = std::fs::read(source_path).map_err(|source| DeriveError::Io {
                path: source_path.to_path_buf(),
                source,
            })?;
            let meta = extract_metadata_from_bytes(&bytes);
            let decoded = apply_orientation(decode_rgb(&bytes, source_path)?, meta.orientation);
            let image = self
                .resizer
                .fit_within(&decoded, self.share.max_long_edge, source_path)?;

            write_atomically(&share_path, &encode_jpeg(&image, self.share.quality, &share_path)?)?;
            on_artifact(artifact(Variant::Share, &share_path, self.share, false));

            metadata = Some(meta);
            share_image = Some(image);
        }

        if thumb_path.is_file() {
            debug!(path = %thumb_path.display(), "Reusing thumbnail");
            on_artifact(artifact(Variant::Thumbnail, &thumb_path, self.thumbnail, true));
        } else {
            let base = match share_image {
                Some(image) => image,
                None => {
                    let bytes = std::fs::read(&share_path).map_err(|source| DeriveError::Io {
                        path: share_path.clone(),
                        source,
                    })?;
                    decode_rgb(&bytes, &share_path)?
                }
            };
            let thumb = self
                .resizer
                .fit_within(&base, self.thumbnail.max_long_edge, source_path)?;
            write_atomically(
                &thumb_path,
                &encode_jpeg(&thumb, self.thumbnail.quality, &thumb_path)?,
            )?;
            on_artifact(artifact(Variant::Thumbnail, &thumb_path, self.thumbnail, false));
        }

        Ok(metadata.unwrap_or_else(|| extract_metadata(source_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ExtendedColorType, Rgb};
    use std::fs;
    use tempfile::TempDir;

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 60]));
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 90)
            .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn small_deriver() -> Deriver {
        Deriver::new(
            VariantParams {
                max_long_edge: 200,
                quality: 90,
            },
            VariantParams {
                max_long_edge: 50,
                quality: 85,
            },
        )
    }

    #[test]
    fn derives_both_variants_within_bounds() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("card/100CANON/IMG_0001.JPG");
        write_jpeg(&source, 400, 300);
        let layout = SessionLayout::new(dir.path().join("session"));

        let mut delivered = Vec::new();
        small_deriver()
            .derive(&source, Path::new("100CANON/IMG_0001.JPG"), &layout, |a| delivered.push(a))
            .unwrap();

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].variant, Variant::Share);
        assert_eq!(delivered[1].variant, Variant::Thumbnail);
        assert!(delivered.iter().all(|a| !a.reused));

        let share = image::open(&delivered[0].local_path).unwrap();
        let thumb = image::open(&delivered[1].local_path).unwrap();
        assert_eq!((share.width(), share.height()), (200, 150));
        assert_eq!((thumb.width(), thumb.height()), (50, 38));
        assert!(delivered[1].local_path.ends_with("derived/thumbs/100CANON/IMG_0001.jpg"));
    }

    #[test]
    fn small_source_is_not_enlarged() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("IMG_0002.JPG");
        write_jpeg(&source, 40, 30);
        let layout = SessionLayout::new(dir.path().join("session"));

        let mut delivered = Vec::new();
        small_deriver()
            .derive(&source, Path::new("IMG_0002.JPG"), &layout, |a| delivered.push(a))
            .unwrap();

        let share = image::open(&delivered[0].local_path).unwrap();
        assert_eq!((share.width(), share.height()), (40, 30));
    }

    #[test]
    fn existing_variants_are_reused() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("IMG_0003.JPG");
        write_jpeg(&source, 400, 300);
        let layout = SessionLayout::new(dir.path().join("session"));
        let mut deriver = small_deriver();

        deriver
            .derive(&source, Path::new("IMG_0003.JPG"), &layout, |_| {})
            .unwrap();
        let mut second = Vec::new();
        deriver
            .derive(&source, Path::new("IMG_0003.JPG"), &layout, |a| second.push(a))
            .unwrap();

        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|a| a.reused));
    }

    #[test]
    fn missing_thumbnail_is_rebuilt_from_share_image() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("IMG_0004.JPG");
        write_jpeg(&source, 400, 300);
        let layout = SessionLayout::new(dir.path().join("session"));
        let mut deriver = small_deriver();

        let mut first = Vec::new();
        deriver
            .derive(&source, Path::new("IMG_0004.JPG"), &layout, |a| first.push(a))
            .unwrap();
        fs::remove_file(&first[1].local_path).unwrap();
        fs::remove_file(&source).unwrap();

        let mut second = Vec::new();
        deriver
            .derive(&source, Path::new("IMG_0004.JPG"), &layout, |a| second.push(a))
            .unwrap();
        assert!(second[0].reused);
        assert!(!second[1].reused);
        assert!(second[1].local_path.is_file());
    }

    #[test]
    fn corrupt_source_is_a_decode_error_without_artifacts() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("IMG_0005.JPG");
        fs::write(&source, b"not a jpeg at all").unwrap();
        let layout = SessionLayout::new(dir.path().join("session"));

        let mut delivered = Vec::new();
        let result = small_deriver().derive(&source, Path::new("IMG_0005.JPG"), &layout, |a| {
            delivered.push(a)
        });

        assert!(matches!(result, Err(DeriveError::Decode { .. })));
        assert!(delivered.is_empty());
    }
}
