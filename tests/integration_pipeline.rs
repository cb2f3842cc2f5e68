//! Integration tests for the ingest pipeline.
//!
//! These tests run whole ingests against an in-memory object store:
//! - Fresh cards (all JPEG, RAW+JPEG pairs)
//! - Re-inserting a card that was already ingested
//! - Content that moved or was renamed on the card
//! - Progressive gallery publication
//! - An object store that stops answering mid-upload

use assert_fs::prelude::*;
use card_ingest::config::IngestConfig;
use card_ingest::core::pipeline::{IngestOutcome, IngestPipeline, SessionReport};
use card_ingest::core::remote::{MemoryObjectStore, ObjectStore};
use card_ingest::core::session::{list_sessions, SessionState};
use card_ingest::core::store::{IngestIndex, InMemoryStore, UploadIndex};
use card_ingest::error::RemoteError;
use card_ingest::IngestError;
use card_ingest::events::{Event, EventChannel, GalleryEvent};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use predicates::prelude::*;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Encode a small gradient JPEG; `seed` makes the bytes unique
fn jpeg_bytes(seed: u8, width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    });
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

/// Forwards to a memory store, keeping every gallery document written.
/// Artifact puts can be made to fail as if the network dropped.
struct RecordingStore {
    inner: Arc<MemoryObjectStore>,
    artifacts_unreachable: bool,
    galleries: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn new(inner: Arc<MemoryObjectStore>, artifacts_unreachable: bool) -> Self {
        Self {
            inner,
            artifacts_unreachable,
            galleries: Mutex::new(Vec::new()),
        }
    }
}

impl ObjectStore for RecordingStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        if self.artifacts_unreachable && (key.contains("/share/") || key.contains("/thumbs/")) {
            return Err(RemoteError::Unreachable {
                reason: "network is down".to_string(),
            });
        }
        self.inner.put(key, bytes)?;
        if key.ends_with("index.html") {
            self.galleries
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.inner.exists(key)
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        self.inner.presign_get(key, ttl)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.inner.list(prefix)
    }
}

/// Photo titles shown in a gallery document
fn gallery_titles(html: &str) -> BTreeSet<String> {
    let alt = Regex::new(r#"alt="([^"]+)""#).unwrap();
    alt.captures_iter(html).map(|c| c[1].to_string()).collect()
}

struct Rig {
    home: assert_fs::TempDir,
    card: assert_fs::TempDir,
    remote: Arc<MemoryObjectStore>,
    index: Arc<InMemoryStore>,
}

impl Rig {
    fn new() -> Self {
        Self {
            home: assert_fs::TempDir::new().unwrap(),
            card: assert_fs::TempDir::new().unwrap(),
            remote: Arc::new(MemoryObjectStore::new()),
            index: Arc::new(InMemoryStore::new()),
        }
    }

    fn config(&self) -> IngestConfig {
        IngestConfig::rooted_at(self.home.path())
            .with_workers(2, 2)
            .with_refresh_interval(Duration::from_millis(10))
    }

    fn pipeline(&self) -> IngestPipeline {
        self.pipeline_over(self.remote.clone())
    }

    fn pipeline_over(&self, store: Arc<dyn ObjectStore>) -> IngestPipeline {
        IngestPipeline::builder()
            .config(self.config())
            .stores(self.index.clone())
            .object_store(store)
            .build()
            .unwrap()
    }

    fn put_jpeg(&self, relative: &str, seed: u8) {
        self.card
            .child(relative)
            .write_binary(&jpeg_bytes(seed, 96, 64))
            .unwrap();
    }

    fn completed(&self) -> SessionReport {
        match self.pipeline().run(self.card.path()).unwrap() {
            IngestOutcome::Completed(report) => report,
            other => panic!("expected a session, got {:?}", other),
        }
    }

    fn sessions(&self) -> usize {
        list_sessions(&self.config().sessions_dir).len()
    }

    fn remote_keys_under(&self, prefix: &str) -> Vec<String> {
        self.remote
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect()
    }
}

#[test]
fn fresh_card_of_four_jpegs_is_ingested_once() {
    let rig = Rig::new();
    for i in 1..=4u8 {
        rig.put_jpeg(&format!("DCIM/100CANON/IMG_000{}.JPG", i), i * 40);
    }
    let card_root = rig.card.path().join("DCIM");

    let report = match rig.pipeline().run(&card_root).unwrap() {
        IngestOutcome::Completed(report) => report,
        other => panic!("expected a session, got {:?}", other),
    };

    assert_eq!(report.state, SessionState::Done);
    assert!(!report.resumed);
    assert_eq!(report.counts.discovered, 4);
    assert_eq!(report.counts.new_files, 4);
    assert_eq!(report.counts.processed, 4);
    assert_eq!(report.counts.uploaded, 8);
    assert_eq!(report.counts.errors, 0);

    let session_dir = rig.home.child("sessions").child(report.session_id.as_str());
    for i in 1..=4 {
        session_dir
            .child(format!("originals/100CANON/IMG_000{}.JPG", i))
            .assert(predicate::path::is_file());
        session_dir
            .child(format!("derived/share/100CANON/IMG_000{}.jpg", i))
            .assert(predicate::path::is_file());
        session_dir
            .child(format!("derived/thumbs/100CANON/IMG_000{}.jpg", i))
            .assert(predicate::path::is_file());
    }
    session_dir.child("share.zip").assert(predicate::path::is_file());
    session_dir
        .child("share.txt")
        .assert(predicate::str::contains("index.html"));

    let base = format!("sessions/{}/", report.session_id);
    let share = rig.remote_keys_under(&format!("{base}share/"));
    let thumbs = rig.remote_keys_under(&format!("{base}thumbs/"));
    assert_eq!(share.len(), 4);
    assert_eq!(thumbs.len(), 4);
    for key in share.iter().chain(&thumbs) {
        assert_eq!(rig.remote.put_count(key), 1, "{} uploaded more than once", key);
    }
    assert_eq!(rig.remote.put_count(&format!("{base}share.zip")), 1);

    let gallery = String::from_utf8(rig.remote.get(&format!("{base}index.html")).unwrap()).unwrap();
    assert!(gallery.contains("4 photos"));
    assert!(gallery.contains("share.zip"));

    // Same card again: nothing new, no new session
    let outcome = rig.pipeline().run(&card_root).unwrap();
    assert!(matches!(
        outcome,
        IngestOutcome::NoNewContent { discovered: 4, skipped: 4 }
    ));
    assert_eq!(rig.sessions(), 1);
    assert_eq!(rig.index.stats().unwrap().ingested_files, 4);
}

#[test]
fn raw_and_jpeg_pair_copies_both_and_derives_once() {
    let rig = Rig::new();
    rig.card
        .child("IMG_0001.CR3")
        .write_binary(b"raw sensor data that no decoder will ever read")
        .unwrap();
    rig.put_jpeg("IMG_0001.JPG", 7);

    let report = rig.completed();

    assert_eq!(report.counts.new_files, 2);
    assert_eq!(report.counts.processed, 1);
    assert_eq!(report.counts.uploaded, 2);
    assert_eq!(report.counts.errors, 0);

    let session_dir = rig.home.child("sessions").child(report.session_id.as_str());
    session_dir
        .child("originals/IMG_0001.CR3")
        .assert(predicate::path::is_file());
    session_dir
        .child("originals/IMG_0001.JPG")
        .assert(predicate::path::is_file());
    session_dir
        .child("derived/share/IMG_0001.jpg")
        .assert(predicate::path::is_file());

    let base = format!("sessions/{}/", report.session_id);
    assert_eq!(rig.remote_keys_under(&format!("{base}share/")).len(), 1);
    assert_eq!(rig.remote_keys_under(&format!("{base}thumbs/")).len(), 1);
}

#[test]
fn content_ingested_under_another_name_is_skipped() {
    let rig = Rig::new();
    rig.put_jpeg("100CANON/IMG_0001.JPG", 1);
    rig.completed();

    // The same bytes under a new folder and name, plus one genuinely new shot
    std::fs::remove_file(rig.card.path().join("100CANON/IMG_0001.JPG")).unwrap();
    rig.put_jpeg("101CANON/IMG_0100.JPG", 1);
    rig.put_jpeg("101CANON/IMG_0101.JPG", 2);

    let report = rig.completed();
    assert_eq!(report.counts.discovered, 2);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.new_files, 1);

    let session_dir = rig.home.child("sessions").child(report.session_id.as_str());
    session_dir
        .child("originals/101CANON/IMG_0101.JPG")
        .assert(predicate::path::is_file());
    session_dir
        .child("originals/101CANON/IMG_0100.JPG")
        .assert(predicate::path::missing());
    assert_eq!(rig.index.stats().unwrap().ingested_files, 2);
}

#[test]
fn corrupt_jpeg_is_counted_without_failing_the_session() {
    let rig = Rig::new();
    rig.put_jpeg("IMG_0001.JPG", 1);
    rig.card
        .child("IMG_0002.JPG")
        .write_binary(b"\xFF\xD8 definitely not a complete jpeg")
        .unwrap();

    let report = rig.completed();

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.counts.new_files, 2);
    assert_eq!(report.counts.processed, 1);
    assert_eq!(report.counts.errors, 1);
    // The corrupt original is still preserved
    rig.home
        .child("sessions")
        .child(report.session_id.as_str())
        .child("originals/IMG_0002.JPG")
        .assert(predicate::path::is_file());
}

#[test]
fn upload_records_track_every_artifact() {
    let rig = Rig::new();
    rig.put_jpeg("IMG_0001.JPG", 1);
    rig.put_jpeg("IMG_0002.JPG", 2);

    let report = rig.completed();
    let base = format!("sessions/{}/", report.session_id);

    for key in rig.remote_keys_under(&format!("{base}share/")) {
        let recorded = rig.index.uploaded_hash(&key).unwrap();
        assert!(recorded.is_some(), "no upload record for {}", key);
    }
    // Two artifacts per source plus the bundle
    assert_eq!(rig.index.upload_count().unwrap(), 5);
}

#[test]
fn progressive_gallery_never_shrinks() {
    let rig = Rig::new();
    for i in 0..8u8 {
        rig.put_jpeg(&format!("IMG_{:04}.JPG", i), i * 30);
    }
    let store = Arc::new(RecordingStore::new(rig.remote.clone(), false));

    let (sender, receiver) = EventChannel::new();
    let outcome = rig
        .pipeline_over(store.clone())
        .run_with_events(rig.card.path(), &sender)
        .unwrap();
    let IngestOutcome::Completed(report) = outcome else {
        panic!("expected a session");
    };

    let published: Vec<(usize, bool)> = receiver
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            Event::Gallery(GalleryEvent::Published {
                item_count,
                is_final,
                ..
            }) => Some((item_count, is_final)),
            _ => None,
        })
        .collect();

    assert!(!published.is_empty());
    for pair in published.windows(2) {
        assert!(pair[1].0 >= pair[0].0, "gallery shrank: {:?}", published);
    }
    let (last_count, last_final) = *published.last().unwrap();
    assert!(last_final);
    assert_eq!(last_count, report.counts.processed);
    assert_eq!(last_count, 8);

    // Every photo shown once is still shown by every later document
    let documents: Vec<BTreeSet<String>> = store
        .galleries
        .lock()
        .unwrap()
        .iter()
        .map(|html| gallery_titles(html))
        .collect();
    assert!(documents.len() >= 2, "placeholder and final document expected");
    for pair in documents.windows(2) {
        assert!(
            pair[0].is_subset(&pair[1]),
            "{:?} dropped from the gallery",
            pair[0].difference(&pair[1]).collect::<Vec<_>>()
        );
    }
    let last = documents.last().unwrap();
    assert_eq!(last.len(), 8);
    assert!(last.contains("IMG_0000.JPG"));
}

#[test]
fn unreachable_store_fails_the_session_in_upload() {
    let rig = Rig::new();
    for i in 1..=3u8 {
        rig.put_jpeg(&format!("IMG_000{}.JPG", i), i * 50);
    }
    let store = Arc::new(RecordingStore::new(rig.remote.clone(), true));

    let result = rig.pipeline_over(store.clone()).run(rig.card.path());

    match result {
        Err(IngestError::Fatal { stage, session, message }) => {
            assert_eq!(stage, "upload");
            assert!(session.is_some());
            assert!(message.contains("network is down"), "{}", message);
        }
        other => panic!("expected a fatal upload error, got {:?}", other),
    }

    let sessions = list_sessions(&rig.config().sessions_dir);
    assert_eq!(sessions.len(), 1);
    let manifest = &sessions[0].1;
    assert_eq!(manifest.state, SessionState::Error);
    assert!(manifest.error.is_some());

    // Only the placeholder went out; no empty "final" gallery replaced it
    let galleries = store.galleries.lock().unwrap();
    assert_eq!(galleries.len(), 1);
    assert!(gallery_titles(&galleries[0]).is_empty());
    assert!(!galleries[0].contains(" photos"));
    assert!(rig.remote_keys_under("sessions/").iter().all(|key| !key.ends_with("share.zip")));
}

#[test]
fn always_create_session_opens_a_session_for_a_known_card() {
    let rig = Rig::new();
    rig.put_jpeg("IMG_0001.JPG", 1);
    rig.completed();

    let pipeline = IngestPipeline::builder()
        .config(rig.config().with_always_create_session(true))
        .stores(rig.index.clone())
        .object_store(rig.remote.clone())
        .build()
        .unwrap();
    let IngestOutcome::Completed(report) = pipeline.run(rig.card.path()).unwrap() else {
        panic!("expected a session");
    };

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.counts.new_files, 0);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(rig.sessions(), 2);
}

#[test]
fn nonexistent_card_fails_before_any_session() {
    let rig = Rig::new();
    let result = rig.pipeline().run(Path::new("/nonexistent/card/DCIM"));
    assert!(result.is_err());
    assert_eq!(rig.sessions(), 0);
    assert_eq!(rig.remote.total_puts(), 0);
}
