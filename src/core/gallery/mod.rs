//! # Gallery Module
//!
//! The share link's content: a placeholder right after the session is
//! created, progressive documents while artifacts land, and a final
//! document once publishing finishes. Every image reference is a
//! presigned URL.
//!
//! ## Monotonicity
//! `GalleryBuilder` remembers the last URL issued per key. An item that
//! was published once stays published even when presigning it again fails.

mod builder;
mod presign;
mod render;

pub use builder::{GalleryBuilder, GalleryDocument};
pub use presign::Presigner;
pub use render::{render_gallery, render_placeholder, GalleryPage, RenderedItem};

use crate::core::metadata::CaptureMetadata;
use crate::core::remote::ObjectStore;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One logical photo in the gallery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    /// Relative path of the derivation source
    pub relative_path: PathBuf,
    /// File name, used as caption and tie-breaker
    pub title: String,
    pub share_key: String,
    pub thumb_key: String,
    /// Where an enhanced version would appear
    pub enhanced_key: String,
    pub captured_at: Option<NaiveDateTime>,
    pub camera: Option<String>,
}

impl GalleryItem {
    pub fn new(
        relative_path: &Path,
        share_key: String,
        thumb_key: String,
        enhanced_key: String,
        metadata: &CaptureMetadata,
    ) -> Self {
        let title = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            relative_path: relative_path.to_path_buf(),
            title,
            share_key,
            thumb_key,
            enhanced_key,
            captured_at: metadata.captured_at,
            camera: metadata.camera_label(),
        }
    }
}

/// Capture time ascending, undated items last, then by title
pub fn gallery_order(a: &GalleryItem, b: &GalleryItem) -> Ordering {
    match (a.captured_at, b.captured_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.title.cmp(&b.title))
    .then_with(|| a.relative_path.cmp(&b.relative_path))
}

/// Asks whether the enhancement service has produced a version of an item
pub trait EnhancementProbe: Send + Sync {
    fn is_enhanced(&self, item: &GalleryItem) -> bool;
}

/// Checks the item's `enhanced/` key in the object store
pub struct StoreEnhancementProbe<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> StoreEnhancementProbe<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }
}

impl EnhancementProbe for StoreEnhancementProbe<'_> {
    fn is_enhanced(&self, item: &GalleryItem) -> bool {
        match self.store.exists(&item.enhanced_key) {
            Ok(found) => found,
            Err(e) => {
                debug!(key = %item.enhanced_key, error = %e, "Enhancement probe failed");
                false
            }
        }
    }
}
