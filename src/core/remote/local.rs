//! Directory-backed bucket.
//!
//! Objects live under `<root>/objects/<key>`. Presigned URLs are `file://`
//! URLs carrying an expiry and a SHA-256 signature over the key and expiry,
//! keyed by a secret generated on first open.

use super::traits::{validate_key, ObjectStore};
use crate::core::session::relative_key;
use crate::error::RemoteError;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const SECRET_FILE: &str = ".presign-secret";

pub struct LocalObjectStore {
    objects: PathBuf,
    secret: String,
}

impl LocalObjectStore {
    /// Open (or initialize) a bucket rooted at `root`
    pub fn open(root: &Path) -> Result<Self, RemoteError> {
        let unreachable = |e: std::io::Error| RemoteError::Unreachable {
            reason: format!("{}: {}", root.display(), e),
        };

        let objects = root.join(OBJECTS_DIR);
        fs::create_dir_all(&objects).map_err(unreachable)?;
        let objects = fs::canonicalize(&objects).map_err(unreachable)?;

        let secret_path = root.join(SECRET_FILE);
        let secret = match fs::read_to_string(&secret_path) {
            Ok(secret) if !secret.trim().is_empty() => secret.trim().to_string(),
            _ => {
                let secret = uuid::Uuid::new_v4().simple().to_string();
                fs::write(&secret_path, &secret).map_err(unreachable)?;
                info!(path = %secret_path.display(), "Initialized bucket signing secret");
                secret
            }
        };

        Ok(Self { objects, secret })
    }

    /// Filesystem path holding `key`
    pub fn object_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.objects.clone(), |path, part| path.join(part))
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `url` was issued by this bucket and has not expired
    pub fn verify_presigned(&self, url: &str) -> bool {
        self.verify_presigned_at(url, Utc::now().timestamp())
    }

    fn verify_presigned_at(&self, url: &str, now: i64) -> bool {
        let Some((path, query)) = url
            .strip_prefix("file://")
            .and_then(|rest| rest.split_once('?'))
        else {
            return false;
        };
        let Ok(relative) = Path::new(path).strip_prefix(&self.objects) else {
            return false;
        };
        let key = relative_key(relative);

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                Some(("signature", value)) => signature = Some(value),
                _ => {}
            }
        }

        match (expires, signature) {
            (Some(expires), Some(signature)) => expires >= now && self.sign(&key, expires) == signature,
            _ => false,
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        validate_key(key)?;
        let transient = |e: std::io::Error| RemoteError::Transient {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let path = self.object_path(key);
        let dir = path.parent().unwrap_or(&self.objects);
        fs::create_dir_all(dir).map_err(transient)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(transient)?;
        tmp.write_all(bytes).map_err(transient)?;
        tmp.persist(&path).map_err(|e| transient(e.error))?;

        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        validate_key(key)?;
        Ok(self.object_path(key).is_file())
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        validate_key(key)?;
        let ttl = i64::try_from(ttl.as_secs()).map_err(|_| RemoteError::Presign {
            key: key.to_string(),
            reason: "TTL out of range".to_string(),
        })?;
        let expires = Utc::now().timestamp().saturating_add(ttl);
        Ok(format!(
            "file://{}?expires={}&signature={}",
            self.object_path(key).display(),
            expires,
            self.sign(key, expires)
        ))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut keys: Vec<String> = WalkDir::new(&self.objects)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.objects).ok()?;
                Some(relative_key(relative))
            })
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
