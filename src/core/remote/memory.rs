//! In-process object store for tests, with fault injection.

use super::traits::{validate_key, ObjectStore};
use crate::error::RemoteError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    put_counts: HashMap<String, usize>,
    rejected_prefixes: Vec<String>,
    transient_failures: usize,
    presign_failures: Vec<String>,
    offline: bool,
}

/// Object store held in memory
#[derive(Default)]
pub struct MemoryObjectStore {
    state: RwLock<State>,
    presigns: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place an object without counting it as a put
    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.write().objects.insert(key.to_string(), bytes.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read().objects.get(key).cloned()
    }

    /// Successful puts of `key`
    pub fn put_count(&self, key: &str) -> usize {
        self.read().put_counts.get(key).copied().unwrap_or(0)
    }

    /// Successful puts of any key
    pub fn total_puts(&self) -> usize {
        self.read().put_counts.values().sum()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().objects.keys().cloned().collect()
    }

    /// Reject every put whose key starts with `prefix`
    pub fn fail_puts_with_prefix(&self, prefix: &str) {
        self.write().rejected_prefixes.push(prefix.to_string());
    }

    /// Fail the next `count` puts with a transient error
    pub fn fail_transiently(&self, count: usize) {
        self.write().transient_failures = count;
    }

    /// Fail presigning any key starting with `prefix`
    pub fn fail_presign_with_prefix(&self, prefix: &str) {
        self.write().presign_failures.push(prefix.to_string());
    }

    pub fn clear_faults(&self) {
        let mut state = self.write();
        state.rejected_prefixes.clear();
        state.transient_failures = 0;
        state.presign_failures.clear();
        state.offline = false;
    }

    /// Every operation fails as unreachable while offline
    pub fn set_offline(&self, offline: bool) {
        self.write().offline = offline;
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.read().offline {
            return Err(RemoteError::Unreachable {
                reason: "store is offline".to_string(),
            });
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        validate_key(key)?;
        self.check_online()?;

        let mut state = self.write();
        if state.rejected_prefixes.iter().any(|p| key.starts_with(p.as_str())) {
            return Err(RemoteError::Rejected {
                key: key.to_string(),
                reason: "injected rejection".to_string(),
            });
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RemoteError::Transient {
                key: key.to_string(),
                reason: "injected timeout".to_string(),
            });
        }

        state.objects.insert(key.to_string(), bytes.to_vec());
        *state.put_counts.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        validate_key(key)?;
        self.check_online()?;
        Ok(self.read().objects.contains_key(key))
    }

    /// Each call yields a distinct URL so callers can tell reissued links apart
    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        validate_key(key)?;
        self.check_online()?;
        if self.read().presign_failures.iter().any(|p| key.starts_with(p.as_str())) {
            return Err(RemoteError::Presign {
                key: key.to_string(),
                reason: "injected presign failure".to_string(),
            });
        }
        let n = self.presigns.fetch_add(1, Ordering::Relaxed);
        Ok(format!("memory://{}?ttl={}&n={}", key, ttl.as_secs(), n))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.check_online()?;
        Ok(self
            .read()
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn puts_are_counted_per_key() {
        let store = MemoryObjectStore::new();
        store.put("a/1", b"x").unwrap();
        store.put("a/1", b"y").unwrap();
        store.insert("a/2", b"z");

        assert_eq!(store.put_count("a/1"), 2);
        assert_eq!(store.put_count("a/2"), 0);
        assert_eq!(store.total_puts(), 2);
        assert_eq!(store.get("a/1").unwrap(), b"y");
        assert_eq!(store.list("a/").unwrap(), vec!["a/1", "a/2"]);
    }

    #[test]
    fn injected_faults_fire() {
        let store = MemoryObjectStore::new();
        store.fail_puts_with_prefix("bad/");
        store.fail_transiently(1);

        assert!(matches!(store.put("ok/1", b"x"), Err(RemoteError::Transient { .. })));
        assert!(store.put("ok/1", b"x").is_ok());
        assert!(matches!(store.put("bad/1", b"x"), Err(RemoteError::Rejected { .. })));

        store.fail_presign_with_prefix("ok/");
        assert!(store.presign_get("ok/1", Duration::from_secs(1)).is_err());

        store.clear_faults();
        assert!(store.put("bad/1", b"x").is_ok());
        assert!(store.presign_get("ok/1", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn offline_store_is_unreachable() {
        let store = MemoryObjectStore::new();
        store.set_offline(true);
        let err = store.put("a/1", b"x").unwrap_err();
        assert!(err.is_transient());
        store.set_offline(false);
        assert!(store.put("a/1", b"x").is_ok());
    }

    #[test]
    fn presigned_urls_are_distinct() {
        let store = MemoryObjectStore::new();
        let a = store.presign_get("k/1", Duration::from_secs(5)).unwrap();
        let b = store.presign_get("k/1", Duration::from_secs(5)).unwrap();
        assert_ne!(a, b);
    }
}
