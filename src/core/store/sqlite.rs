//! SQLite backend for the ingest and upload indexes.

use super::{IngestIndex, IngestStats, IngestedRecord, NewIngestRecord, UploadIndex, UploadRecord};
use crate::core::hasher::ContentHash;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Stay well under SQLite's bound-parameter limit
const LOOKUP_CHUNK: usize = 500;

/// SQLite-backed persistent store
///
/// Uses WAL mode so the `stats` command can read while an ingest writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the index database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS ingested_files (
                sha256 TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                first_seen_utc TEXT NOT NULL,
                source_hint TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_ingested_size ON ingested_files(size_bytes);
             CREATE TABLE IF NOT EXISTS uploads (
                s3_key TEXT PRIMARY KEY,
                local_sha256 TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                uploaded_utc TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS failed_files (
                file_path TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                first_failed_utc TEXT NOT NULL,
                last_failed_utc TEXT NOT NULL,
                failure_count INTEGER NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Corrupted {
            path: self.db_path.clone(),
        })
    }

    fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Malformed(format!("timestamp '{}': {}", value, e)))
    }

    fn parse_hash(value: &str) -> Result<ContentHash, StoreError> {
        ContentHash::from_hex(value)
            .ok_or_else(|| StoreError::Malformed(format!("hash '{}'", value)))
    }
}

impl IngestIndex for SqliteStore {
    fn lookup_many(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>, StoreError> {
        let conn = self.lock()?;
        let mut known = HashSet::new();

        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT sha256 FROM ingested_files WHERE sha256 IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|h| h.as_str())), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                known.insert(Self::parse_hash(&row?)?);
            }
        }

        Ok(known)
    }

    fn record_many(&self, records: &[NewIngestRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO ingested_files
                 (sha256, size_bytes, first_seen_utc, source_hint)
                 VALUES (?, ?, ?, ?)",
            )?;
            for record in records {
                inserted += stmt.execute(params![
                    record.hash.as_str(),
                    record.size as i64,
                    now,
                    record.source_hint,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn known_sizes(&self) -> Result<HashSet<u64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT size_bytes FROM ingested_files")?;
        let sizes = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|size| size.map(|s| s as u64))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(sizes)
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<IngestedRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT size_bytes, first_seen_utc, source_hint
                 FROM ingested_files WHERE sha256 = ?",
                [hash.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(size, first_seen, source_hint)| {
            Ok(IngestedRecord {
                hash: hash.clone(),
                size: size as u64,
                first_seen: Self::parse_time(&first_seen)?,
                source_hint,
            })
        })
        .transpose()
    }

    fn record_hash_failures(&self, failures: &[(PathBuf, u64)]) -> Result<(), StoreError> {
        if failures.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO failed_files
                 (file_path, size_bytes, first_failed_utc, last_failed_utc, failure_count)
                 VALUES (?1, ?2, ?3, ?3, 1)
                 ON CONFLICT(file_path) DO UPDATE SET
                    size_bytes = excluded.size_bytes,
                    last_failed_utc = excluded.last_failed_utc,
                    failure_count = failure_count + 1",
            )?;
            for (path, size) in failures {
                stmt.execute(params![path.to_string_lossy(), *size as i64, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn persistent_failures(&self, min_count: u32) -> Result<HashSet<PathBuf>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT file_path FROM failed_files WHERE failure_count >= ?")?;
        let paths = stmt
            .query_map([min_count as i64], |row| row.get::<_, String>(0))?
            .map(|p| p.map(PathBuf::from))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    }

    fn stats(&self) -> Result<IngestStats, StoreError> {
        let conn = self.lock()?;

        let (ingested_files, ingested_bytes, first, last) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0),
                    MIN(first_seen_utc), MAX(first_seen_utc)
             FROM ingested_files",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )?;
        let uploads: i64 = conn.query_row("SELECT COUNT(*) FROM uploads", [], |row| row.get(0))?;
        let failed_files: i64 =
            conn.query_row("SELECT COUNT(*) FROM failed_files", [], |row| row.get(0))?;

        Ok(IngestStats {
            ingested_files: ingested_files as usize,
            ingested_bytes: ingested_bytes as u64,
            uploads: uploads as usize,
            failed_files: failed_files as usize,
            first_ingest: first.as_deref().map(Self::parse_time).transpose()?,
            last_ingest: last.as_deref().map(Self::parse_time).transpose()?,
        })
    }
}

impl UploadIndex for SqliteStore {
    fn uploaded_hash(&self, key: &str) -> Result<Option<ContentHash>, StoreError> {
        let conn = self.lock()?;
        let hash: Option<String> = conn
            .query_row(
                "SELECT local_sha256 FROM uploads WHERE s3_key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        hash.as_deref().map(Self::parse_hash).transpose()
    }

    fn mark_uploaded(&self, record: &UploadRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO uploads (s3_key, local_sha256, size_bytes, uploaded_utc)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(s3_key) DO UPDATE SET
                local_sha256 = excluded.local_sha256,
                size_bytes = excluded.size_bytes,
                uploaded_utc = excluded.uploaded_utc",
            params![
                record.key,
                record.hash.as_str(),
                record.size as i64,
                record.uploaded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upload_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM uploads", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
