//! Transport retry policy for any object store.

use super::traits::ObjectStore;
use crate::error::RemoteError;
use std::time::Duration;
use tracing::warn;

/// How many times to retry a transient failure and how long to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry `n` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }
}

/// Retries transient failures of the wrapped store with linear backoff
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ObjectStore> RetryingStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn attempt<T>(
        &self,
        op: &str,
        key: &str,
        f: impl Fn(&S) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut retries = 0;
        loop {
            match f(&self.inner) {
                Err(e) if e.is_transient() && retries < self.policy.max_retries => {
                    retries += 1;
                    warn!(op, key, attempt = retries, error = %e, "Retrying remote operation");
                    let delay = self.policy.base_delay * retries;
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                result => return result,
            }
        }
    }
}

impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        self.attempt("put", key, |s| s.put(key, bytes))
    }

    fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.attempt("exists", key, |s| s.exists(key))
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, RemoteError> {
        self.attempt("presign", key, |s| s.presign_get(key, ttl))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.attempt("list", prefix, |s| s.list(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::remote::MemoryObjectStore;

    #[test]
    fn transient_failures_are_retried() {
        let inner = MemoryObjectStore::new();
        inner.fail_transiently(2);
        let store = RetryingStore::with_policy(inner, RetryPolicy::immediate(3));

        store.put("a/1", b"x").unwrap();
        assert_eq!(store.inner().put_count("a/1"), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let inner = MemoryObjectStore::new();
        inner.fail_transiently(5);
        let store = RetryingStore::with_policy(inner, RetryPolicy::immediate(2));

        assert!(matches!(store.put("a/1", b"x"), Err(RemoteError::Transient { .. })));
        assert_eq!(store.inner().put_count("a/1"), 0);
    }

    #[test]
    fn rejections_are_not_retried() {
        let inner = MemoryObjectStore::new();
        inner.fail_puts_with_prefix("a/");
        inner.fail_transiently(1);
        let store = RetryingStore::with_policy(inner, RetryPolicy::immediate(3));

        assert!(matches!(store.put("a/1", b"x"), Err(RemoteError::Rejected { .. })));
    }
}
