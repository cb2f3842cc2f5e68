//! The overlapped derive + upload stage.
//!
//! Derivation workers hand each artifact to the upload workers through a
//! bounded channel the moment it is written. The calling thread drains
//! both workers' results and republishes the gallery on a timer whenever
//! more items became ready.

use crate::config::IngestConfig;
use crate::core::derive::{DerivedArtifact, Deriver, Variant};
use crate::core::gallery::{GalleryBuilder, GalleryItem};
use crate::core::metadata::CaptureMetadata;
use crate::core::remote::{ObjectStore, SessionKeys};
use crate::core::session::Session;
use crate::core::store::UploadIndex;
use crate::core::upload::{UploadOutcome, Uploader};
use crate::events::{DeriveEvent, Event, EventSender, GalleryEvent, UploadEvent};
use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIN_REFRESH: Duration = Duration::from_millis(10);

/// One derivation source
#[derive(Debug, Clone)]
pub struct DeriveTask {
    /// Where the source is read from
    pub source_path: PathBuf,
    pub relative_path: PathBuf,
}

/// Everything the stage works against
pub struct OverlapContext<'a> {
    pub session: &'a Session,
    pub source_root: &'a Path,
    pub store: &'a dyn ObjectStore,
    pub uploads: &'a dyn UploadIndex,
    pub keys: &'a SessionKeys,
    pub config: &'a IngestConfig,
    pub events: &'a EventSender,
}

/// What the stage produced
#[derive(Debug, Default)]
pub struct OverlapReport {
    /// Items with both variants in the store
    pub items: Vec<GalleryItem>,
    /// Progressive documents published
    pub refreshes: usize,
    /// Set when the stage stopped before every task was handled
    pub aborted: Option<StageAbort>,
}

/// Why the stage stopped early. Work finished before the stop is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAbort {
    /// The source volume went away mid-derivation
    VolumeLost(String),
    /// The object store stopped answering even after retries
    RemoteUnreachable(String),
}

impl StageAbort {
    /// Stage name for the fatal error
    pub fn stage(&self) -> &'static str {
        match self {
            StageAbort::VolumeLost(_) => "derive",
            StageAbort::RemoteUnreachable(_) => "upload",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            StageAbort::VolumeLost(reason) | StageAbort::RemoteUnreachable(reason) => reason,
        }
    }
}

enum DeriveMessage {
    Derived {
        relative_path: PathBuf,
        metadata: CaptureMetadata,
    },
    Failed,
    Aborted {
        reason: String,
    },
}

struct UploadMessage {
    relative_path: PathBuf,
    variant: Variant,
    in_store: bool,
    unreachable: Option<String>,
}

#[derive(Default)]
struct ItemProgress {
    metadata: Option<CaptureMetadata>,
    share: bool,
    thumbnail: bool,
}

/// Tracks which items have every piece in place
#[derive(Default)]
struct ReadyLedger {
    items: BTreeMap<PathBuf, ItemProgress>,
}

impl ReadyLedger {
    fn derived(&mut self, relative_path: PathBuf, metadata: CaptureMetadata) {
        self.items.entry(relative_path).or_default().metadata = Some(metadata);
    }

    fn uploaded(&mut self, message: UploadMessage) {
        if !message.in_store {
            return;
        }
        let progress = self.items.entry(message.relative_path).or_default();
        match message.variant {
            Variant::Share => progress.share = true,
            Variant::Thumbnail => progress.thumbnail = true,
        }
    }

    fn ready_count(&self) -> usize {
        self.items
            .values()
            .filter(|p| p.metadata.is_some() && p.share && p.thumbnail)
            .count()
    }

    fn ready_items(&self, keys: &SessionKeys) -> Vec<GalleryItem> {
        self.items
            .iter()
            .filter(|(_, p)| p.share && p.thumbnail)
            .filter_map(|(relative, p)| {
                let metadata = p.metadata.as_ref()?;
                Some(GalleryItem::new(
                    relative,
                    keys.variant(Variant::Share, relative).ok()?,
                    keys.variant(Variant::Thumbnail, relative).ok()?,
                    keys.enhanced(relative).ok()?,
                    metadata,
                ))
            })
            .collect()
    }
}

/// Run derivation and upload concurrently over `tasks`
pub fn run_overlapped(
    ctx: &OverlapContext<'_>,
    tasks: Vec<DeriveTask>,
    gallery: &mut GalleryBuilder<'_>,
) -> OverlapReport {
    let config = ctx.config;
    ctx.events.send(Event::Derive(DeriveEvent::Started {
        total_sources: tasks.len(),
    }));

    let (task_tx, task_rx) = unbounded::<DeriveTask>();
    for task in tasks {
        // The receiver is alive until the scope below ends
        let _ = task_tx.send(task);
    }
    drop(task_tx);

    let (artifact_tx, artifact_rx) = bounded::<DerivedArtifact>(config.upload_queue_depth);
    let (derived_tx, derived_rx) = unbounded::<DeriveMessage>();
    let (uploaded_tx, uploaded_rx) = unbounded::<UploadMessage>();
    let abort = AtomicBool::new(false);
    let remote_lost = AtomicBool::new(false);
    let uploader = Uploader::new(ctx.store, ctx.uploads);

    let mut report = OverlapReport::default();
    let mut ledger = ReadyLedger::default();

    std::thread::scope(|scope| {
        for _ in 0..config.derive_workers {
            let tasks = task_rx.clone();
            let artifacts = artifact_tx.clone();
            let results = derived_tx.clone();
            let abort = &abort;
            scope.spawn(move || derive_worker(ctx, tasks, artifacts, results, abort));
        }
        drop(artifact_tx);
        drop(derived_tx);

        for _ in 0..config.upload_workers {
            let artifacts = artifact_rx.clone();
            let results = uploaded_tx.clone();
            let uploader = &uploader;
            let abort = &abort;
            let remote_lost = &remote_lost;
            scope.spawn(move || upload_worker(ctx, uploader, artifacts, results, abort, remote_lost));
        }
        drop(uploaded_tx);

        let ticker = tick(config.gallery_refresh_interval.max(MIN_REFRESH));
        let mut derived_rx = derived_rx;
        let mut uploaded_rx = uploaded_rx;
        let mut derive_open = true;
        let mut upload_open = true;
        let mut published_ready = 0;

        while derive_open || upload_open {
            select! {
                recv(derived_rx) -> message => match message {
                    Ok(DeriveMessage::Derived { relative_path, metadata }) => {
                        ctx.session.counters().add_processed(1);
                        ledger.derived(relative_path, metadata);
                    }
                    Ok(DeriveMessage::Failed) => ctx.session.counters().add_errors(1),
                    Ok(DeriveMessage::Aborted { reason }) => {
                        report.aborted.get_or_insert(StageAbort::VolumeLost(reason));
                    }
                    Err(_) => derive_open = false,
                },
                recv(uploaded_rx) -> message => match message {
                    Ok(mut message) => {
                        if let Some(reason) = message.unreachable.take() {
                            report.aborted.get_or_insert(StageAbort::RemoteUnreachable(reason));
                        }
                        ledger.uploaded(message);
                    }
                    Err(_) => upload_open = false,
                },
                recv(ticker) -> _ => {
                    let ready = ledger.ready_count();
                    // A failed republish is retried on the next tick
                    if ready > published_ready
                        && publish_progress(ctx, gallery, &ledger.ready_items(ctx.keys))
                    {
                        report.refreshes += 1;
                        published_ready = ready;
                    }
                }
            }

            // A disconnected receiver is always ready; stop selecting on it
            if !derive_open {
                derived_rx = never();
            }
            if !upload_open {
                uploaded_rx = never();
            }
        }
    });

    report.items = ledger.ready_items(ctx.keys);
    info!(
        session = %ctx.session.id(),
        ready = report.items.len(),
        refreshes = report.refreshes,
        aborted = report.aborted.is_some(),
        "Derive and upload stage finished"
    );
    report
}

fn derive_worker(
    ctx: &OverlapContext<'_>,
    tasks: Receiver<DeriveTask>,
    artifacts: Sender<DerivedArtifact>,
    results: Sender<DeriveMessage>,
    abort: &AtomicBool,
) {
    let layout = ctx.session.layout();
    let mut deriver = Deriver::new(ctx.config.share, ctx.config.thumbnail);

    for task in tasks.iter() {
        if abort.load(Ordering::Relaxed) {
            break;
        }

        let result = deriver.derive(&task.source_path, &task.relative_path, layout, |artifact| {
            ctx.events.send(Event::Derive(DeriveEvent::ArtifactReady {
                relative_path: artifact.source_relative.clone(),
                variant: artifact.variant.dir_name().to_string(),
            }));
            // Blocks while the upload queue is full
            let _ = artifacts.send(artifact);
        });

        let message = match result {
            Ok(metadata) => {
                debug!(path = %task.relative_path.display(), "Derived");
                DeriveMessage::Derived {
                    relative_path: task.relative_path,
                    metadata,
                }
            }
            Err(e) if std::fs::read_dir(ctx.source_root).is_err() => {
                error!(session = %ctx.session.id(), error = %e, "Source volume lost during derivation");
                abort.store(true, Ordering::Relaxed);
                let _ = results.send(DeriveMessage::Aborted {
                    reason: format!("source volume lost: {}", e),
                });
                break;
            }
            Err(e) => {
                warn!(path = %task.source_path.display(), error = %e, "Derivation failed");
                ctx.events.send(Event::Derive(DeriveEvent::Error {
                    path: task.source_path.clone(),
                    message: e.to_string(),
                }));
                DeriveMessage::Failed
            }
        };
        let _ = results.send(message);
    }
}

fn upload_worker(
    ctx: &OverlapContext<'_>,
    uploader: &Uploader<'_>,
    artifacts: Receiver<DerivedArtifact>,
    results: Sender<UploadMessage>,
    abort: &AtomicBool,
    remote_lost: &AtomicBool,
) {
    let counters = ctx.session.counters();

    for artifact in artifacts.iter() {
        // Keep draining so blocked derivation workers can see the abort
        if remote_lost.load(Ordering::Relaxed) {
            let _ = results.send(UploadMessage {
                relative_path: artifact.source_relative,
                variant: artifact.variant,
                in_store: false,
                unreachable: None,
            });
            continue;
        }

        let key = ctx.keys.variant(artifact.variant, &artifact.source_relative);
        let (key, outcome) = match key {
            Ok(key) => {
                let outcome = uploader.upload_file(&key, &artifact.local_path);
                (key, outcome)
            }
            Err(e) => (
                artifact.source_relative.display().to_string(),
                UploadOutcome::Failed {
                    reason: e.to_string(),
                },
            ),
        };

        match &outcome {
            UploadOutcome::Uploaded { bytes } => {
                counters.add_uploaded(1);
                ctx.events.send(Event::Upload(UploadEvent::Uploaded {
                    key: key.clone(),
                    bytes: *bytes,
                }));
            }
            UploadOutcome::Unchanged => {
                counters.add_upload_unchanged(1);
                ctx.events.send(Event::Upload(UploadEvent::Unchanged { key: key.clone() }));
            }
            UploadOutcome::Failed { reason } => {
                counters.add_errors(1);
                warn!(key = %key, reason = %reason, "Upload failed");
                ctx.events.send(Event::Upload(UploadEvent::Error {
                    key: key.clone(),
                    message: reason.clone(),
                }));
            }
            UploadOutcome::Unreachable { reason } => {
                counters.add_errors(1);
                error!(session = %ctx.session.id(), key = %key, reason = %reason, "Object store unreachable; stopping");
                remote_lost.store(true, Ordering::Relaxed);
                abort.store(true, Ordering::Relaxed);
                ctx.events.send(Event::Upload(UploadEvent::Error {
                    key: key.clone(),
                    message: reason.clone(),
                }));
            }
        }

        let unreachable = match &outcome {
            UploadOutcome::Unreachable { reason } => Some(reason.clone()),
            _ => None,
        };

        let _ = results.send(UploadMessage {
            relative_path: artifact.source_relative,
            variant: artifact.variant,
            in_store: outcome.in_store(),
            unreachable,
        });
    }
}

/// Republish the in-progress gallery. A failure keeps the previous document live.
fn publish_progress(ctx: &OverlapContext<'_>, gallery: &mut GalleryBuilder<'_>, items: &[GalleryItem]) -> bool {
    let document = gallery.build(items, false);
    match gallery.upload(&document.html) {
        Ok(()) => {
            debug!(items = document.item_count, "Republished gallery");
            ctx.events.send(Event::Gallery(GalleryEvent::Published {
                key: ctx.keys.gallery(),
                item_count: document.item_count,
                is_final: false,
            }));
            true
        }
        Err(e) => {
            warn!(error = %e, "Progressive gallery publish failed");
            ctx.events.send(Event::Gallery(GalleryEvent::Error {
                message: e.to_string(),
            }));
            false
        }
    }
}
