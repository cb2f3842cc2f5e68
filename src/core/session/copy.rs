//! Copy stage: originals from the volume into the session.

use super::Session;
use crate::core::hasher::{copy_and_hash, hash_file, ContentHash};
use crate::core::scanner::MediaFile;
use crate::core::store::{IngestIndex, NewIngestRecord};
use crate::error::{IngestError, Result};
use crate::events::{CopyEvent, Event, EventSender};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Per-file result of the copy stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { bytes: u64 },
    /// An identical file was already at the destination
    AlreadyPresent,
    Failed { reason: String },
}

impl CopyOutcome {
    /// Whether the original is now in the session
    pub fn landed(&self) -> bool {
        !matches!(self, CopyOutcome::Failed { .. })
    }
}

/// Outcomes aligned with the input file list
#[derive(Debug, Default)]
pub struct CopyReport {
    pub outcomes: Vec<CopyOutcome>,
    /// Dedup records inserted at the end of the stage
    pub committed: usize,
}

impl CopyReport {
    pub fn copied(&self) -> usize {
        self.count(|o| matches!(o, CopyOutcome::Copied { .. }))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, CopyOutcome::AlreadyPresent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.landed())
    }

    fn count(&self, pred: impl Fn(&CopyOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

enum CopyFailure {
    Io(std::io::Error),
    ContentChanged,
}

/// Copies new originals and commits their dedup records once they are safe on disk
pub struct CopyStage<'a> {
    index: &'a dyn IngestIndex,
    events: &'a EventSender,
}

impl<'a> CopyStage<'a> {
    pub fn new(index: &'a dyn IngestIndex, events: &'a EventSender) -> Self {
        Self { index, events }
    }

    /// Copy every file, then commit records for the ones that landed.
    ///
    /// Losing the source volume commits what was copied so far and aborts.
    pub fn run(&self, session: &Session, source_root: &Path, files: &[MediaFile]) -> Result<CopyReport> {
        self.events.send(Event::Copy(CopyEvent::Started {
            total_files: files.len(),
        }));

        let mut report = CopyReport::default();
        let mut records = Vec::with_capacity(files.len());

        for file in files {
            let outcome = match self.copy_file(session, file) {
                Ok(outcome) => outcome,
                Err(CopyFailure::Io(e)) if fs::read_dir(source_root).is_err() => {
                    error!(session = %session.id(), path = %file.path.display(), "Source volume lost during copy");
                    let committed = self.commit(&records)?;
                    session.counters().add_new(report.outcomes.iter().filter(|o| o.landed()).count());
                    return Err(IngestError::fatal(
                        "copy",
                        Some(session.id().as_str()),
                        format!(
                            "source volume lost after {} files ({} committed): {}",
                            report.outcomes.len(),
                            committed,
                            e
                        ),
                    ));
                }
                Err(CopyFailure::Io(e)) => CopyOutcome::Failed {
                    reason: e.to_string(),
                },
                Err(CopyFailure::ContentChanged) => CopyOutcome::Failed {
                    reason: "content changed between hashing and copying".to_string(),
                },
            };

            match &outcome {
                CopyOutcome::Copied { bytes } => {
                    self.events.send(Event::Copy(CopyEvent::FileCopied {
                        relative_path: file.relative_path.clone(),
                        bytes: *bytes,
                    }));
                }
                CopyOutcome::AlreadyPresent => {
                    debug!(path = %file.relative_path.display(), "Original already present");
                }
                CopyOutcome::Failed { reason } => {
                    warn!(path = %file.path.display(), reason = %reason, "Copy failed");
                    self.events.send(Event::Copy(CopyEvent::Error {
                        path: file.path.clone(),
                        message: reason.clone(),
                    }));
                }
            }

            if outcome.landed() {
                if let Some(hash) = file.content_hash() {
                    records.push(NewIngestRecord {
                        hash: hash.clone(),
                        size: file.size,
                        source_hint: format!(
                            "{}/{}",
                            session.id(),
                            super::relative_key(&file.relative_path)
                        ),
                    });
                }
            }
            report.outcomes.push(outcome);
        }

        report.committed = self.commit(&records)?;

        session.counters().add_new(report.copied() + report.already_present());
        session.counters().add_errors(report.failed());

        info!(
            session = %session.id(),
            copied = report.copied(),
            already_present = report.already_present(),
            failed = report.failed(),
            committed = report.committed,
            "Copy stage complete"
        );
        self.events.send(Event::Copy(CopyEvent::Completed {
            copied: report.copied(),
            already_present: report.already_present(),
            failed: report.failed(),
        }));

        Ok(report)
    }

    fn commit(&self, records: &[NewIngestRecord]) -> Result<usize> {
        Ok(self.index.record_many(records)?)
    }

    fn copy_file(&self, session: &Session, file: &MediaFile) -> std::result::Result<CopyOutcome, CopyFailure> {
        let dest = session
            .layout()
            .original_path(&file.relative_path)
            .map_err(|e| CopyFailure::Io(std::io::Error::other(e.to_string())))?;

        if let Some(expected) = file.content_hash() {
            if dest.is_file() && hash_file(&dest).ok().as_ref() == Some(expected) {
                return Ok(CopyOutcome::AlreadyPresent);
            }
        }

        let (bytes, hash) = copy_atomically(&file.path, &dest, file.content_hash())?;
        if let Ok(out) = File::options().write(true).open(&dest) {
            if let Err(e) = out.set_modified(file.modified) {
                debug!(path = %dest.display(), error = %e, "Could not preserve mtime");
            }
        }
        file.set_hash(hash);
        Ok(CopyOutcome::Copied { bytes })
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Stream `src` into a `.partial` sibling of `dest`, then rename into place
fn copy_atomically(
    src: &Path,
    dest: &Path,
    expected: Option<&ContentHash>,
) -> std::result::Result<(u64, ContentHash), CopyFailure> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(CopyFailure::Io)?;
    }

    let partial = partial_path(dest);
    let result = write_partial(src, &partial, expected)
        .and_then(|copied| fs::rename(&partial, dest).map(|_| copied).map_err(CopyFailure::Io));

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_partial(
    src: &Path,
    partial: &Path,
    expected: Option<&ContentHash>,
) -> std::result::Result<(u64, ContentHash), CopyFailure> {
    let mut reader = File::open(src).map_err(CopyFailure::Io)?;
    let mut writer = BufWriter::new(File::create(partial).map_err(CopyFailure::Io)?);
    let (bytes, hash) = copy_and_hash(&mut reader, &mut writer).map_err(CopyFailure::Io)?;
    let out = writer
        .into_inner()
        .map_err(|e| CopyFailure::Io(e.into_error()))?;
    out.sync_all().map_err(CopyFailure::Io)?;

    if expected.is_some_and(|h| h != &hash) {
        return Err(CopyFailure::ContentChanged);
    }
    Ok((bytes, hash))
}
