//! Bounded pool for presigning many keys at once.

use super::{EnhancementProbe, GalleryItem};
use crate::core::remote::ObjectStore;
use crate::error::{IngestError, RemoteError, Result};
use rayon::prelude::*;
use std::time::Duration;

pub struct Presigner {
    pool: rayon::ThreadPool,
    ttl: Duration,
}

impl Presigner {
    pub fn new(workers: usize, ttl: Duration) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("presign-{}", i))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to start presign workers: {}", e)))?;
        Ok(Self { pool, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn presign(&self, store: &dyn ObjectStore, key: &str) -> std::result::Result<String, RemoteError> {
        store.presign_get(key, self.ttl)
    }

    /// Presign every key; results line up with `keys`
    pub fn presign_all(
        &self,
        store: &dyn ObjectStore,
        keys: &[String],
    ) -> Vec<std::result::Result<String, RemoteError>> {
        self.pool.install(|| {
            keys.par_iter()
                .map(|key| store.presign_get(key, self.ttl))
                .collect()
        })
    }

    /// Enhancement check for every item on the pool; results line up with `items`
    pub fn enhanced_flags(&self, check: &dyn EnhancementProbe, items: &[&GalleryItem]) -> Vec<bool> {
        self.pool
            .install(|| items.par_iter().map(|item| check.is_enhanced(item)).collect())
    }
}
