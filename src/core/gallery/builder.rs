//! Assembles gallery documents from ready items.

use super::presign::Presigner;
use super::render::{render_gallery, render_placeholder, GalleryPage, RenderedItem};
use super::{gallery_order, EnhancementProbe, GalleryItem};
use crate::core::remote::{ObjectStore, SessionKeys};
use crate::error::RemoteError;
use std::collections::HashMap;
use tracing::{debug, warn};

const CAPTURE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A rendered gallery and what went into it
#[derive(Debug, Clone)]
pub struct GalleryDocument {
    pub html: String,
    pub item_count: usize,
    /// Items left out because they could never be presigned
    pub failed: usize,
}

pub struct GalleryBuilder<'a> {
    store: &'a dyn ObjectStore,
    presigner: &'a Presigner,
    probe: &'a dyn EnhancementProbe,
    keys: SessionKeys,
    session_id: String,
    poll_seconds: u32,
    /// Last URL issued per key
    issued: HashMap<String, String>,
    bundle_available: bool,
}

impl<'a> GalleryBuilder<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        presigner: &'a Presigner,
        probe: &'a dyn EnhancementProbe,
        keys: SessionKeys,
        session_id: &str,
        poll_seconds: u32,
    ) -> Self {
        Self {
            store,
            presigner,
            probe,
            keys,
            session_id: session_id.to_string(),
            poll_seconds,
            issued: HashMap::new(),
            bundle_available: false,
        }
    }

    /// Link `share.zip` from the final document once it is in the store
    pub fn set_bundle_available(&mut self, available: bool) {
        self.bundle_available = available;
    }

    pub fn placeholder(&self) -> String {
        render_placeholder(&self.session_id, self.poll_seconds)
    }

    /// Render `items` in gallery order.
    ///
    /// Progressive documents auto-refresh; the final one links the bundle
    /// when it is available.
    pub fn build(&mut self, items: &[GalleryItem], is_final: bool) -> GalleryDocument {
        let mut ordered: Vec<&GalleryItem> = items.iter().collect();
        ordered.sort_by(|a, b| gallery_order(a, b));
        let enhanced = self.presigner.enhanced_flags(self.probe, &ordered);

        let mut keys = Vec::with_capacity(ordered.len() * 2 + 1);
        for (item, enhanced) in ordered.iter().zip(&enhanced) {
            keys.push(item.thumb_key.clone());
            keys.push(item.share_key.clone());
            if *enhanced {
                keys.push(item.enhanced_key.clone());
            }
        }
        let bundle_key = self.keys.bundle();
        let link_bundle = is_final && self.bundle_available;
        if link_bundle {
            keys.push(bundle_key.clone());
        }

        let results = self.presigner.presign_all(self.store, &keys);
        let urls: HashMap<String, Option<String>> = keys
            .into_iter()
            .zip(results)
            .map(|(key, result)| {
                let url = self.resolve(&key, result);
                (key, url)
            })
            .collect();
        let url = |key: &str| urls.get(key).cloned().flatten();

        let mut rendered = Vec::with_capacity(ordered.len());
        let mut failed = 0;
        for (item, enhanced) in ordered.iter().zip(&enhanced) {
            let (Some(thumb_url), Some(share_url)) = (url(&item.thumb_key), url(&item.share_key)) else {
                warn!(item = %item.relative_path.display(), "Leaving item out of gallery; it could not be presigned");
                failed += 1;
                continue;
            };
            rendered.push(RenderedItem {
                title: item.title.clone(),
                caption: caption(item),
                thumb_url,
                share_url,
                enhanced_url: if *enhanced { url(&item.enhanced_key) } else { None },
            });
        }

        let bundle_url = if link_bundle { url(&bundle_key) } else { None };
        let html = render_gallery(&GalleryPage {
            session_id: &self.session_id,
            items: &rendered,
            bundle_url: bundle_url.as_deref(),
            refresh_seconds: (!is_final).then_some(self.poll_seconds),
        });

        debug!(items = rendered.len(), failed, is_final, "Built gallery document");
        GalleryDocument {
            html,
            item_count: rendered.len(),
            failed,
        }
    }

    /// A fresh URL, or the last one issued when presigning fails now
    fn resolve(&mut self, key: &str, result: Result<String, RemoteError>) -> Option<String> {
        match result {
            Ok(url) => {
                self.issued.insert(key.to_string(), url.clone());
                Some(url)
            }
            Err(e) => {
                let cached = self.issued.get(key).cloned();
                warn!(key, error = %e, reused = cached.is_some(), "Presign failed");
                cached
            }
        }
    }

    /// Overwrite the session's gallery document
    pub fn upload(&self, html: &str) -> Result<(), RemoteError> {
        self.store.put(&self.keys.gallery(), html.as_bytes())
    }

    /// Presigned URL of the gallery document
    pub fn share_link(&self) -> Result<String, RemoteError> {
        self.presigner.presign(self.store, &self.keys.gallery())
    }
}

fn caption(item: &GalleryItem) -> Option<String> {
    let parts: Vec<String> = item
        .captured_at
        .map(|t| t.format(CAPTURE_FORMAT).to_string())
        .into_iter()
        .chain(item.camera.clone())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" · "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gallery::StoreEnhancementProbe;
    use crate::core::metadata::CaptureMetadata;
    use crate::core::remote::MemoryObjectStore;
    use std::path::Path;
    use std::time::Duration;

    fn item(keys: &SessionKeys, name: &str) -> GalleryItem {
        let rel = Path::new(name);
        GalleryItem::new(
            rel,
            keys.variant(crate::core::derive::Variant::Share, rel).unwrap(),
            keys.variant(crate::core::derive::Variant::Thumbnail, rel).unwrap(),
            keys.enhanced(rel).unwrap(),
            &CaptureMetadata::default(),
        )
    }

    fn setup() -> (MemoryObjectStore, Presigner, SessionKeys) {
        (
            MemoryObjectStore::new(),
            Presigner::new(2, Duration::from_secs(60)).unwrap(),
            SessionKeys::new("sessions/", "s1"),
        )
    }

    #[test]
    fn items_whose_first_presign_fails_are_skipped() {
        let (store, presigner, keys) = setup();
        let probe = StoreEnhancementProbe::new(&store);
        let items = vec![item(&keys, "A.JPG"), item(&keys, "B.JPG")];
        store.fail_presign_with_prefix("sessions/s1/share/B");

        let mut builder = GalleryBuilder::new(&store, &presigner, &probe, keys, "s1", 2);
        let doc = builder.build(&items, false);

        assert_eq!(doc.item_count, 1);
        assert_eq!(doc.failed, 1);
        assert!(doc.html.contains("A.JPG"));
        assert!(!doc.html.contains("B.JPG"));
    }

    #[test]
    fn published_items_survive_later_presign_failures() {
        let (store, presigner, keys) = setup();
        let probe = StoreEnhancementProbe::new(&store);
        let items = vec![item(&keys, "A.JPG"), item(&keys, "B.JPG")];

        let mut builder = GalleryBuilder::new(&store, &presigner, &probe, keys, "s1", 2);
        let first = builder.build(&items, false);
        assert_eq!(first.item_count, 2);

        store.fail_presign_with_prefix("sessions/s1/");
        builder.set_bundle_available(true);
        let second = builder.build(&items, true);
        assert_eq!(second.item_count, 2);
        assert_eq!(second.failed, 0);
        // The bundle was never presigned before, so it has no fallback
        assert!(!second.html.contains("Download all"));
    }

    #[test]
    fn final_document_links_bundle_and_enhanced_versions() {
        let (store, presigner, keys) = setup();
        let items = vec![item(&keys, "A.JPG")];
        store.insert(&items[0].enhanced_key, b"enhanced");
        let probe = StoreEnhancementProbe::new(&store);

        let mut builder = GalleryBuilder::new(&store, &presigner, &probe, keys, "s1", 2);
        builder.set_bundle_available(true);
        let doc = builder.build(&items, true);

        assert!(doc.html.contains("Download all"));
        assert!(doc.html.contains("memory://sessions/s1/share.zip"));
        assert!(doc.html.contains("memory://sessions/s1/enhanced/A.jpg"));
        assert!(!doc.html.contains("http-equiv"));
    }

    #[test]
    fn upload_and_share_link_target_gallery_key() {
        let (store, presigner, keys) = setup();
        let probe = StoreEnhancementProbe::new(&store);
        let builder = GalleryBuilder::new(&store, &presigner, &probe, keys, "s1", 2);

        builder.upload(&builder.placeholder()).unwrap();
        assert!(store.get("sessions/s1/index.html").is_some());
        assert!(builder
            .share_link()
            .unwrap()
            .starts_with("memory://sessions/s1/index.html?"));
    }
}
