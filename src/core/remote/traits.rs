//! Object store capability.

use crate::error::RemoteError;
use std::sync::Arc;
use std::time::Duration;

/// A private bucket addressed by `/`-separated keys
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError>;

    fn exists(&self, key: &str) -> Result<bool, RemoteError>;

    /// Time-limited read URL for `key`
    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError>;

    /// Keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        (**self).put(key, bytes)
    }

    fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        (**self).exists(key)
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        (**self).presign_get(key, ttl)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        (**self).list(prefix)
    }
}

/// Keys are relative, `/`-separated and never climb out of the bucket
pub fn validate_key(key: &str) -> Result<(), RemoteError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('?')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(RemoteError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}
