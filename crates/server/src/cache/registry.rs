//! Authoritative cache state.
//!
//! Three independent maps, each behind its own `RwLock`:
//! - `busy`: keys with a fetch-and-store in flight (at most one writer each)
//! - `available`: keys known good on disk, with the headers to replay
//! - `purged`: keys an admin invalidated since their last store
//!
//! Locks are only held for map membership changes, never across I/O.

use super::recency::AccessRecencyTracker;
use axum::http::{HeaderMap, header};
use larder_core::CacheKey;
use larder_storage::{ObjectStore, StorageError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("path is busy: {0}")]
    Busy(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("{name} RwLock was poisoned, recovering with into_inner()");
        poisoned.into_inner()
    })
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("{name} RwLock was poisoned, recovering with into_inner()");
        poisoned.into_inner()
    })
}

pub struct CacheRegistry {
    storage: Arc<dyn ObjectStore>,
    busy: RwLock<HashSet<CacheKey>>,
    available: RwLock<HashMap<CacheKey, HeaderMap>>,
    purged: RwLock<HashSet<CacheKey>>,
    recency: AccessRecencyTracker,
}

impl CacheRegistry {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            busy: RwLock::new(HashSet::new()),
            available: RwLock::new(HashMap::new()),
            purged: RwLock::new(HashSet::new()),
            recency: AccessRecencyTracker::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn recency(&self) -> &AccessRecencyTracker {
        &self.recency
    }

    // ===== Busy =====

    /// Atomically become the sole writer for `key`.
    pub fn try_claim_busy(&self, key: &CacheKey) -> bool {
        write(&self.busy, "busy").insert(key.clone())
    }

    pub fn release_busy(&self, key: &CacheKey) {
        write(&self.busy, "busy").remove(key);
    }

    /// Claim `key` and get a guard that releases it when dropped.
    pub fn claim(self: &Arc<Self>, key: &CacheKey) -> Option<BusyClaim> {
        self.try_claim_busy(key).then(|| BusyClaim {
            registry: Arc::clone(self),
            key: key.clone(),
        })
    }

    pub fn is_busy(&self, key: &CacheKey) -> bool {
        read(&self.busy, "busy").contains(key)
    }

    // ===== Available =====

    pub fn get_available(&self, key: &CacheKey) -> Option<HeaderMap> {
        read(&self.available, "available").get(key).cloned()
    }

    /// Record `key` as available with `headers` and bump its recency.
    pub fn mark_available(&self, key: &CacheKey, headers: HeaderMap) {
        write(&self.available, "available").insert(key.clone(), headers);
        self.recency.touch(key.path());
    }

    /// Record a completed read of an available key.
    pub fn touch(&self, key: &CacheKey) {
        self.recency.touch(key.path());
    }

    /// Drop metadata for a key whose backing file disappeared underneath us.
    pub fn forget(&self, key: &CacheKey) {
        write(&self.available, "available").remove(key);
        self.recency.remove(key.path());
    }

    // ===== Purge =====

    pub fn mark_purge_pending(&self, key: &CacheKey) {
        write(&self.purged, "purged").insert(key.clone());
    }

    /// Clear the purge flag. Returns true if a pending purge was fulfilled.
    pub fn clear_purge_pending(&self, key: &CacheKey) -> bool {
        write(&self.purged, "purged").remove(key)
    }

    pub fn is_purge_pending(&self, key: &CacheKey) -> bool {
        read(&self.purged, "purged").contains(key)
    }

    // ===== Disk =====

    /// Size of the backing file, ignoring in-memory metadata.
    pub async fn probe_disk_size(&self, key: &CacheKey) -> Result<Option<u64>, StorageError> {
        match self.storage.head(&key.storage_path()).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove every trace of `key`, including the backing file.
    ///
    /// Fails with [`CacheError::Busy`] while a writer holds the key. The
    /// key stays claimed for the duration so no writer can start midway.
    /// In-memory state is cleared before the unlink; if the unlink fails
    /// the error is returned but the state stays cleared.
    pub async fn delete(self: &Arc<Self>, key: &CacheKey) -> Result<(), CacheError> {
        let _claim = self
            .claim(key)
            .ok_or_else(|| CacheError::Busy(key.path().to_string()))?;

        write(&self.available, "available").remove(key);
        write(&self.purged, "purged").remove(key);
        self.recency.remove(key.path());

        self.storage.delete(&key.storage_path()).await?;
        Ok(())
    }

    // ===== Observability =====

    pub fn count_available(&self) -> usize {
        read(&self.available, "available").len()
    }

    pub fn count_busy(&self) -> usize {
        read(&self.busy, "busy").len()
    }

    pub fn count_purged(&self) -> usize {
        read(&self.purged, "purged").len()
    }

    pub fn is_available(&self, key: &CacheKey) -> bool {
        read(&self.available, "available").contains_key(key)
    }

    /// Available keys, sorted by path.
    pub fn available_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = read(&self.available, "available")
            .keys()
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.path().cmp(b.path()));
        keys
    }

    /// Sum of `Content-Length` over available keys.
    pub fn tracked_size(&self) -> u64 {
        read(&self.available, "available")
            .values()
            .filter_map(content_length)
            .sum()
    }
}

/// Parse the `Content-Length` header.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Exclusive writer claim on a key. Released on drop.
pub struct BusyClaim {
    registry: Arc<CacheRegistry>,
    key: CacheKey,
}

impl BusyClaim {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for BusyClaim {
    fn drop(&mut self) {
        self.registry.release_busy(&self.key);
    }
}

impl std::fmt::Debug for BusyClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyClaim").field("key", &self.key.path()).finish()
    }
}
