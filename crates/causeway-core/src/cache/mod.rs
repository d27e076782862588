//! Tiered Cache
//!
//! Two tiers keyed by [`CacheFingerprint`](crate::fingerprint::CacheFingerprint):
//!
//! - [`MemoryTier`]: LRU over shared payloads, bounded by item count and estimated bytes
//! - [`DiskTier`]: one snapshot-framed file per fingerprint plus a SQLite catalog,
//!   bounded by total bytes
//!
//! [`CacheManager`] combines them. Disk failures never fail a lookup; they degrade to
//! memory-only behavior and are counted as I/O warnings.

pub mod catalog;
pub mod disk;
pub mod manager;
pub mod memory;

pub use catalog::{CacheCatalog, CatalogEntry};
pub use disk::{DiskRead, DiskTier, PruneReport};
pub use manager::{CacheLookup, CacheManager, CacheOrigin, CacheTier, Cached};
pub use memory::{Admission, MemoryTier};

use crate::codec::{CodecError, Compression};
use crate::fingerprint::SourceStamp;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Default item ceiling for the memory tier
pub const DEFAULT_MAX_ITEMS: usize = 16;

/// Default memory budget (1 GiB)
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 1024 * 1024 * 1024;

/// Default disk budget (4 GiB)
pub const DEFAULT_MAX_DISK_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Errors raised by the disk tier
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A payload the cache can hold and persist
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Estimated heap footprint in bytes
    fn estimated_bytes(&self) -> usize;
}

/// One cached payload with its bookkeeping
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub payload: Arc<V>,
    pub estimated_bytes: usize,
    /// Source file state the payload was built from
    pub source: SourceStamp,
    pub created_at: SystemTime,
    pub last_access: SystemTime,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            estimated_bytes: self.estimated_bytes,
            source: self.source.clone(),
            created_at: self.created_at,
            last_access: self.last_access,
        }
    }
}

impl<V: Cacheable> CacheEntry<V> {
    pub fn new(payload: Arc<V>, source: SourceStamp) -> Self {
        let now = SystemTime::now();
        Self {
            estimated_bytes: payload.estimated_bytes(),
            payload,
            source,
            created_at: now,
            last_access: now,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// When false every lookup is a miss and nothing is stored
    pub enabled: bool,
    /// Disk tier directory; `None` keeps the cache in memory only
    pub dir: Option<PathBuf>,
    pub max_items: usize,
    pub max_memory_bytes: usize,
    pub max_disk_bytes: u64,
    pub persist_to_disk: bool,
    pub compression: Compression,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_items: DEFAULT_MAX_ITEMS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            persist_to_disk: true,
            compression: Compression::default(),
        }
    }
}

impl CacheSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_max_disk_bytes(mut self, bytes: u64) -> Self {
        self.max_disk_bytes = bytes;
        self
    }

    pub fn with_persist_to_disk(mut self, persist: bool) -> Self {
        self.persist_to_disk = persist;
        self
    }
}

/// Cache counters and sizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub disk_enabled: bool,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    /// Entries dropped because their source changed
    pub invalidations: u64,
    /// Non-fatal disk-tier failures
    pub io_warnings: u64,
    pub memory_items: usize,
    pub memory_bytes: usize,
    pub disk_files: usize,
    pub disk_bytes: u64,
}

impl CacheStats {
    /// Hits over lookups (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
