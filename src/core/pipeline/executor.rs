//! Pipeline execution implementation.

use super::overlap::{run_overlapped, DeriveTask, OverlapContext};
use crate::config::IngestConfig;
use crate::core::bundle::build_share_bundle;
use crate::core::dedup::{DedupFilter, DedupOutcome};
use crate::core::gallery::{EnhancementProbe, GalleryBuilder, Presigner, StoreEnhancementProbe};
use crate::core::remote::{ObjectStore, SessionKeys};
use crate::core::scanner::{MediaScanner, ScanConfig, WalkDirScanner};
use crate::core::session::{fail_stale_sessions, CopyStage, RecoveryIndex, Session, SessionCounts, SessionId, SessionState};
use crate::core::store::{IngestIndex, SqliteStore, UploadIndex};
use crate::core::upload::{UploadOutcome, Uploader};
use crate::error::{IngestError, Result, ScanError};
use crate::events::{
    null_sender, Event, EventSender, GalleryEvent, PipelineEvent, PipelinePhase, PipelineSummary,
    SessionEvent,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn};

/// How a run ended
#[derive(Debug)]
pub enum IngestOutcome {
    /// Every file was ingested before; no session was created
    NoNewContent { discovered: usize, skipped: usize },
    Completed(SessionReport),
}

/// Final state of a session the run worked on
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: SessionId,
    /// Picked up an incomplete session instead of creating one
    pub resumed: bool,
    pub state: SessionState,
    pub counts: SessionCounts,
    pub share_url: String,
    pub duration_ms: u64,
}

impl SessionReport {
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            session_id: self.session_id.to_string(),
            discovered: self.counts.discovered,
            new_files: self.counts.new_files,
            skipped: self.counts.skipped,
            processed: self.counts.processed,
            uploaded: self.counts.uploaded,
            upload_unchanged: self.counts.upload_unchanged,
            errors: self.counts.errors,
            share_url: self.share_url.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// Builder for the ingest pipeline
pub struct IngestPipelineBuilder {
    config: IngestConfig,
    index: Option<Arc<dyn IngestIndex>>,
    uploads: Option<Arc<dyn UploadIndex>>,
    store: Option<Arc<dyn ObjectStore>>,
    probe: Option<Arc<dyn EnhancementProbe>>,
}

impl IngestPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            index: None,
            uploads: None,
            store: None,
            probe: None,
        }
    }

    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Use one backend for both the dedup and the upload index
    pub fn stores<S>(mut self, store: Arc<S>) -> Self
    where
        S: IngestIndex + UploadIndex + 'static,
    {
        self.index = Some(store.clone() as Arc<dyn IngestIndex>);
        self.uploads = Some(store as Arc<dyn UploadIndex>);
        self
    }

    pub fn index(mut self, index: Arc<dyn IngestIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn upload_index(mut self, uploads: Arc<dyn UploadIndex>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default probe, which checks `enhanced/` keys in the store
    pub fn enhancement_probe(mut self, probe: Arc<dyn EnhancementProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validate the config and open the SQLite indexes unless others were given
    pub fn build(self) -> Result<IngestPipeline> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| IngestError::Config("no object store configured".to_string()))?;

        let (index, uploads) = match (self.index, self.uploads) {
            (Some(index), Some(uploads)) => (index, uploads),
            (index, uploads) => {
                let sqlite = Arc::new(SqliteStore::open(&self.config.db_path)?);
                (
                    index.unwrap_or_else(|| sqlite.clone() as Arc<dyn IngestIndex>),
                    uploads.unwrap_or_else(|| sqlite as Arc<dyn UploadIndex>),
                )
            }
        };

        Ok(IngestPipeline {
            config: self.config,
            index,
            uploads,
            store,
            probe: self.probe,
        })
    }
}

impl Default for IngestPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The session ingestion pipeline
pub struct IngestPipeline {
    config: IngestConfig,
    index: Arc<dyn IngestIndex>,
    uploads: Arc<dyn UploadIndex>,
    store: Arc<dyn ObjectStore>,
    probe: Option<Arc<dyn EnhancementProbe>>,
}

impl IngestPipeline {
    pub fn builder() -> IngestPipelineBuilder {
        IngestPipelineBuilder::new()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a volume without events
    pub fn run(&self, source_root: &Path) -> Result<IngestOutcome> {
        self.run_with_events(source_root, &null_sender())
    }

    /// Ingest a volume, reporting progress on `events`
    pub fn run_with_events(&self, source_root: &Path, events: &EventSender) -> Result<IngestOutcome> {
        let start = Instant::now();
        events.send(Event::Pipeline(PipelineEvent::Started));

        let result = self.ingest(source_root, events, start);
        if let Err(e) = &result {
            error!(error = %e, "Ingest failed");
            events.send(Event::Pipeline(PipelineEvent::Error {
                message: e.to_string(),
            }));
        }
        result
    }

    fn ingest(&self, source_root: &Path, events: &EventSender, start: Instant) -> Result<IngestOutcome> {
        // Phase 1: Scanning
        phase(events, PipelinePhase::Scanning);
        let scanner = WalkDirScanner::new(ScanConfig {
            follow_symlinks: false,
            include_hidden: self.config.include_hidden,
        });
        let scan = scanner
            .scan_with_events(source_root, events)
            .map_err(|e| match e {
                ScanError::VolumeLost { .. } => IngestError::fatal("scan", None, e.to_string()),
                other => IngestError::Scan(other),
            })?;
        let discovered = scan.files.len();
        let scan_errors = scan.errors.len();

        // Phase 2: Hashing
        phase(events, PipelinePhase::Hashing);
        let recovery = RecoveryIndex::load(&self.config.sessions_dir, self.config.recovery_window);
        let dedup = DedupFilter::new(
            self.index.as_ref(),
            self.config.hash_workers,
            recovery,
            self.config.failure_skip_threshold,
        )?;
        let outcome = dedup.filter(source_root, scan.files, events)?;

        if !outcome.has_new_content() && !self.config.always_create_session {
            let skipped = outcome.skipped + outcome.skipped_failures;
            info!(discovered, skipped, "Nothing new on the volume; no session created");
            // No file on this volume belongs to them; they will not finish now
            match fail_stale_sessions(
                &self.config.sessions_dir,
                self.config.recovery_window,
                "abandoned: a later run found nothing left to ingest",
            ) {
                Ok(failed) if !failed.is_empty() => {
                    info!(count = failed.len(), "Marked stale sessions as failed")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not mark stale sessions as failed"),
            }
            events.send(Event::Pipeline(PipelineEvent::NoNewContent { discovered, skipped }));
            return Ok(IngestOutcome::NoNewContent { discovered, skipped });
        }

        let (session, resumed) = match &outcome.resume_session {
            Some(id) => {
                let session = Session::resume(&self.config.sessions_dir, id)?;
                events.send(Event::Session(SessionEvent::Resumed {
                    session_id: id.to_string(),
                }));
                (session, true)
            }
            None => {
                let session = Session::create(&self.config.sessions_dir, source_root)?;
                events.send(Event::Session(SessionEvent::Created {
                    session_id: session.id().to_string(),
                    path: session.layout().root().to_path_buf(),
                }));
                (session, false)
            }
        };

        let span = info_span!("session", id = %session.id());
        let _guard = span.enter();

        let counters = session.counters();
        counters.add_discovered(discovered);
        counters.add_skipped(outcome.skipped + outcome.skipped_failures);
        counters.add_new(outcome.recovered.len());
        counters.add_errors(scan_errors + outcome.hash_errors);

        match self.run_session(&session, source_root, outcome, events) {
            Ok(share_url) => {
                let report = SessionReport {
                    session_id: session.id().clone(),
                    resumed,
                    state: session.state(),
                    counts: counters.snapshot(),
                    share_url,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                info!(
                    new = report.counts.new_files,
                    skipped = report.counts.skipped,
                    processed = report.counts.processed,
                    uploaded = report.counts.uploaded,
                    unchanged = report.counts.upload_unchanged,
                    errors = report.counts.errors,
                    "Session complete"
                );
                events.send(Event::Pipeline(PipelineEvent::Completed {
                    summary: report.summary(),
                }));
                Ok(IngestOutcome::Completed(report))
            }
            Err(e) => {
                if let Err(persist) = session.fail(&e.to_string()) {
                    warn!(error = %persist, "Could not record session failure");
                }
                events.send(Event::Session(SessionEvent::StateChanged {
                    session_id: session.id().to_string(),
                    state: SessionState::Error.to_string(),
                }));
                Err(e)
            }
        }
    }

    /// Copy, derive, upload and publish. Returns the final share link.
    fn run_session(
        &self,
        session: &Session,
        source_root: &Path,
        outcome: DedupOutcome,
        events: &EventSender,
    ) -> Result<String> {
        let session_id = session.id().as_str();
        let fatal = |stage: &str, message: String| IngestError::fatal(stage, Some(session_id), message);

        let DedupOutcome {
            new_files,
            recovered,
            ..
        } = outcome;
        let plan = |session: &Session| {
            session.record_planned(
                new_files
                    .iter()
                    .chain(&recovered)
                    .map(|f| (f.relative_path.as_path(), f.content_hash(), f.size)),
            )
        };
        plan(session)?;

        let keys = SessionKeys::new(&self.config.key_prefix, session_id);
        let presigner = Presigner::new(self.config.presign_workers, self.config.presign_ttl)?;
        let default_probe = StoreEnhancementProbe::new(self.store.as_ref());
        let probe: &dyn EnhancementProbe = match &self.probe {
            Some(probe) => probe.as_ref(),
            None => &default_probe,
        };
        let mut gallery = GalleryBuilder::new(
            self.store.as_ref(),
            &presigner,
            probe,
            keys.clone(),
            session_id,
            self.config.poll_seconds,
        );

        // The share link exists before any copying starts
        gallery
            .upload(&gallery.placeholder())
            .map_err(|e| fatal("publish", format!("placeholder publish failed: {}", e)))?;
        let placeholder_url = gallery
            .share_link()
            .map_err(|e| fatal("publish", format!("placeholder presign failed: {}", e)))?;
        session.set_share_url(&placeholder_url)?;
        events.send(Event::Session(SessionEvent::ShareLink {
            session_id: session_id.to_string(),
            url: placeholder_url,
        }));

        // Phase 3: Copying
        advance(session, SessionState::Copying, events)?;
        phase(events, PipelinePhase::Copying);
        let copy = CopyStage::new(self.index.as_ref(), events).run(session, source_root, &new_files)?;
        // Prefiltered files were hashed while copying
        plan(session)?;

        // Phase 4: Deriving + uploading
        advance(session, SessionState::Deriving, events)?;
        phase(events, PipelinePhase::Processing);
        let tasks: Vec<DeriveTask> = new_files
            .iter()
            .zip(&copy.outcomes)
            .filter(|(_, outcome)| outcome.landed())
            .map(|(file, _)| file)
            .chain(&recovered)
            .filter(|file| file.is_derivation_source())
            .map(|file| DeriveTask {
                source_path: file.path.clone(),
                relative_path: file.relative_path.clone(),
            })
            .collect();

        let ctx = OverlapContext {
            session,
            source_root,
            store: self.store.as_ref(),
            uploads: self.uploads.as_ref(),
            keys: &keys,
            config: &self.config,
            events,
        };
        let overlap = run_overlapped(&ctx, tasks, &mut gallery);
        session.checkpoint()?;
        if let Some(abort) = overlap.aborted {
            return Err(fatal(abort.stage(), abort.reason().to_string()));
        }

        // Phase 5: Publishing
        advance(session, SessionState::Publishing, events)?;
        phase(events, PipelinePhase::Publishing);
        build_share_bundle(session.layout())?;
        let uploader = Uploader::new(self.store.as_ref(), self.uploads.as_ref());
        match uploader.upload_file(&keys.bundle(), &session.layout().bundle_path()) {
            UploadOutcome::Failed { reason } => {
                warn!(reason = %reason, "Bundle upload failed; gallery will not link it");
                session.counters().add_errors(1);
            }
            UploadOutcome::Unreachable { reason } => {
                session.counters().add_errors(1);
                return Err(fatal("upload", reason));
            }
            _ => gallery.set_bundle_available(true),
        }

        let document = gallery.build(&overlap.items, true);
        session.counters().add_errors(document.failed);
        gallery
            .upload(&document.html)
            .map_err(|e| fatal("publish", format!("final gallery publish failed: {}", e)))?;
        let share_url = gallery
            .share_link()
            .map_err(|e| fatal("publish", format!("share link presign failed: {}", e)))?;
        session.set_share_url(&share_url)?;
        events.send(Event::Gallery(GalleryEvent::Published {
            key: keys.gallery(),
            item_count: document.item_count,
            is_final: true,
        }));
        events.send(Event::Session(SessionEvent::ShareLink {
            session_id: session_id.to_string(),
            url: share_url.clone(),
        }));

        advance(session, SessionState::Done, events)?;
        Ok(share_url)
    }
}

fn phase(events: &EventSender, phase: PipelinePhase) {
    events.send(Event::Pipeline(PipelineEvent::PhaseChanged { phase }));
}

fn advance(session: &Session, state: SessionState, events: &EventSender) -> Result<()> {
    session.advance(state)?;
    events.send(Event::Session(SessionEvent::StateChanged {
        session_id: session.id().to_string(),
        state: state.to_string(),
    }));
    Ok(())
}
