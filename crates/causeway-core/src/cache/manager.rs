//! Cache Manager
//!
//! First stop for every load. Lookup order is memory, then disk (promoting disk hits
//! into memory), then the caller's loader. Per entry:
//!
//! ```text
//! absent ──load──▶ memory ──persist──▶ memory + disk ──evict──▶ disk only
//!    ▲                                                            │
//!    └──────────────── source changed (size or mtime) ◀───────────┘
//! ```
//!
//! Concurrent loads of one fingerprint are serialized with per-fingerprint locks and
//! double-checked lookups, so the loader runs at most once while others wait for its
//! result. Loads of different fingerprints proceed in parallel.
//!
//! The manager is shared as `Arc<CacheManager<V>>`. After [`CacheManager::close`], or
//! when built disabled, every lookup is a clean miss.

use super::disk::{DiskRead, DiskTier, PruneReport};
use super::memory::{Admission, MemoryTier};
use super::{CacheEntry, CacheSettings, CacheStats, Cacheable};
use crate::fingerprint::{CacheFingerprint, SourceStamp};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which tier served a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CacheTier {
    Memory,
    Disk,
}

/// Result of a cache lookup
#[derive(Debug)]
pub enum CacheLookup<V> {
    Hit { entry: CacheEntry<V>, tier: CacheTier },
    Miss,
}

impl<V> CacheLookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Where a `get_or_load` result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CacheOrigin {
    Memory,
    Disk,
    Loaded,
}

impl From<CacheTier> for CacheOrigin {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Memory => Self::Memory,
            CacheTier::Disk => Self::Disk,
        }
    }
}

/// A payload returned by `get_or_load`
#[derive(Debug)]
pub struct Cached<V> {
    pub payload: Arc<V>,
    pub origin: CacheOrigin,
}

pub struct CacheManager<V: Cacheable> {
    settings: CacheSettings,
    memory: MemoryTier<V>,
    disk: RwLock<Option<DiskTier>>,
    /// Per-fingerprint loading locks
    loading_locks: DashMap<String, Arc<Mutex<()>>>,
    stats: Mutex<CacheStats>,
    closed: AtomicBool,
}

impl<V: Cacheable> CacheManager<V> {
    /// Build a manager. A disk tier that cannot be opened is logged and skipped.
    pub fn new(settings: CacheSettings) -> Self {
        let disk = match (&settings.dir, settings.enabled && settings.persist_to_disk) {
            (Some(dir), true) => {
                match DiskTier::open(dir, settings.max_disk_bytes, settings.compression) {
                    Ok(disk) => Some(disk),
                    Err(e) => {
                        warn!(
                            "Disk cache at {:?} unavailable, using memory only: {}",
                            dir, e
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let stats = CacheStats {
            enabled: settings.enabled,
            disk_enabled: disk.is_some(),
            ..Default::default()
        };

        Self {
            memory: MemoryTier::new(settings.max_items, settings.max_memory_bytes),
            disk: RwLock::new(disk),
            loading_locks: DashMap::new(),
            stats: Mutex::new(stats),
            closed: AtomicBool::new(false),
            settings,
        }
    }

    /// A manager that never stores anything
    pub fn disabled() -> Self {
        Self::new(CacheSettings::disabled())
    }

    /// Memory-only manager with the given ceilings
    pub fn memory_only(max_items: usize, max_memory_bytes: usize) -> Self {
        Self::new(
            CacheSettings::default()
                .with_max_items(max_items)
                .with_max_memory_bytes(max_memory_bytes),
        )
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled && !self.closed.load(Ordering::SeqCst)
    }

    pub fn has_disk_tier(&self) -> bool {
        self.disk.read().is_some()
    }

    fn io_warning(&self, context: &str, error: impl std::fmt::Display) {
        warn!("Disk cache {} failed: {}", context, error);
        self.stats.lock().io_warnings += 1;
    }

    /// Memory-only lookup
    fn get_memory(&self, fingerprint: &CacheFingerprint) -> Option<CacheEntry<V>> {
        let entry = self.memory.get(fingerprint.as_str())?;
        self.stats.lock().memory_hits += 1;
        debug!("Memory cache hit for {}", fingerprint.short());
        Some(entry)
    }

    /// Drop entries for the same source built from an older file state
    fn sweep_stale(&self, current: &SourceStamp) {
        let stale = self
            .memory
            .remove_where(|entry| entry.source.path == current.path && entry.source.is_stale(current));

        let mut invalidated = stale.len() as u64;
        if let Some(disk) = self.disk.read().as_ref() {
            match disk.invalidate_stale(current) {
                Ok(removed) => invalidated += removed as u64,
                Err(e) => self.io_warning("invalidation", e),
            }
        }

        if invalidated > 0 {
            debug!(
                "Invalidated {} stale entries for {:?}",
                invalidated, current.path
            );
            self.stats.lock().invalidations += invalidated;
        }
    }

    /// Look up both tiers. Disk hits are promoted into memory.
    pub fn get(&self, fingerprint: &CacheFingerprint) -> CacheLookup<V> {
        if !self.is_enabled() {
            return CacheLookup::Miss;
        }

        if let Some(entry) = self.get_memory(fingerprint) {
            return CacheLookup::Hit {
                entry,
                tier: CacheTier::Memory,
            };
        }

        self.sweep_stale(fingerprint.stamp());

        let read = match self.disk.read().as_ref() {
            Some(disk) => disk.read::<V>(fingerprint),
            None => Ok(DiskRead::Miss),
        };

        match read {
            Ok(DiskRead::Hit(payload)) => {
                let entry = CacheEntry::new(Arc::new(payload), fingerprint.stamp().clone());
                self.admit(fingerprint, entry.clone());
                self.stats.lock().disk_hits += 1;
                debug!("Disk cache hit for {}", fingerprint.short());
                CacheLookup::Hit {
                    entry,
                    tier: CacheTier::Disk,
                }
            }
            Ok(DiskRead::Corrupt(reason)) => {
                self.io_warning("read", reason);
                self.stats.lock().misses += 1;
                CacheLookup::Miss
            }
            Ok(DiskRead::Miss) => {
                self.stats.lock().misses += 1;
                CacheLookup::Miss
            }
            Err(e) => {
                self.io_warning("read", e);
                self.stats.lock().misses += 1;
                CacheLookup::Miss
            }
        }
    }

    fn admit(&self, fingerprint: &CacheFingerprint, entry: CacheEntry<V>) {
        match self.memory.insert(fingerprint.as_str().to_string(), entry) {
            Admission::Inserted { evicted } => {
                if !evicted.is_empty() {
                    debug!("Evicted {} entries from memory", evicted.len());
                    self.stats.lock().memory_evictions += evicted.len() as u64;
                }
            }
            Admission::TooLarge { bytes, budget } => {
                debug!(
                    "Entry {} ({} bytes) exceeds memory budget ({} bytes), not held in memory",
                    fingerprint.short(),
                    bytes,
                    budget
                );
            }
        }
    }

    /// Store a payload in memory and, when configured, on disk
    pub fn insert(&self, fingerprint: &CacheFingerprint, payload: Arc<V>) {
        if !self.is_enabled() {
            return;
        }

        let entry = CacheEntry::new(Arc::clone(&payload), fingerprint.stamp().clone());
        self.admit(fingerprint, entry);
        self.stats.lock().insertions += 1;

        if let Some(disk) = self.disk.read().as_ref() {
            match disk.write(fingerprint, payload.as_ref()) {
                Ok(evicted) if evicted > 0 => {
                    self.stats.lock().disk_evictions += evicted as u64;
                }
                Ok(_) => {}
                Err(e) => self.io_warning("write", e),
            }
        }
    }

    /// Return the cached payload for `fingerprint`, running `load` on a miss.
    ///
    /// At most one loader runs per fingerprint at a time; concurrent callers block on
    /// the first and then read its result from the cache.
    pub fn get_or_load<E, F>(
        &self,
        fingerprint: &CacheFingerprint,
        load: F,
    ) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if !self.is_enabled() {
            return Ok(Cached {
                payload: Arc::new(load()?),
                origin: CacheOrigin::Loaded,
            });
        }

        // First check: memory only, no lock
        if let Some(entry) = self.get_memory(fingerprint) {
            return Ok(Cached {
                payload: entry.payload,
                origin: CacheOrigin::Memory,
            });
        }

        let key = fingerprint.as_str().to_string();
        let loading_lock = self
            .loading_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = loading_lock.lock();

            // Second check: another caller may have finished while we waited
            match self.get(fingerprint) {
                CacheLookup::Hit { entry, tier } => Ok(Cached {
                    payload: entry.payload,
                    origin: tier.into(),
                }),
                CacheLookup::Miss => load().map(|value| {
                    let payload = Arc::new(value);
                    self.insert(fingerprint, Arc::clone(&payload));
                    Cached {
                        payload,
                        origin: CacheOrigin::Loaded,
                    }
                }),
            }
        };

        // Drop the lock entry once nobody else holds it
        drop(loading_lock);
        self.loading_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Remove one fingerprint from both tiers
    pub fn invalidate(&self, fingerprint: &CacheFingerprint) -> bool {
        let in_memory = self.memory.remove(fingerprint.as_str()).is_some();
        let on_disk = match self.disk.read().as_ref() {
            Some(disk) => disk.remove(fingerprint.as_str()).unwrap_or_else(|e| {
                self.io_warning("invalidation", e);
                false
            }),
            None => false,
        };
        let removed = in_memory || on_disk;
        if removed {
            self.stats.lock().invalidations += 1;
        }
        removed
    }

    /// Remove every entry built from `path`, whatever its file state
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut removed = self.memory.remove_source(&path).len();
        if let Some(disk) = self.disk.read().as_ref() {
            match disk.remove_source(&path) {
                Ok(n) => removed += n,
                Err(e) => self.io_warning("invalidation", e),
            }
        }
        if removed > 0 {
            info!("Invalidated {} cache entries for {:?}", removed, path);
            self.stats.lock().invalidations += removed as u64;
        }
        removed
    }

    /// Empty both tiers
    pub fn clear(&self) -> usize {
        let mut removed = self.memory.clear();
        if let Some(disk) = self.disk.read().as_ref() {
            match disk.clear() {
                Ok(n) => removed += n,
                Err(e) => self.io_warning("clear", e),
            }
        }
        info!("Cleared {} cache entries", removed);
        removed
    }

    /// Disk maintenance sweep; `None` without a disk tier
    pub fn prune(&self) -> Option<PruneReport> {
        let disk = self.disk.read();
        let disk = disk.as_ref()?;
        match disk.prune() {
            Ok(report) => Some(report),
            Err(e) => {
                self.io_warning("prune", e);
                None
            }
        }
    }

    pub fn memory_contains(&self, fingerprint: &CacheFingerprint) -> bool {
        self.memory.contains(fingerprint.as_str())
    }

    pub fn disk_contains(&self, fingerprint: &CacheFingerprint) -> bool {
        match self.disk.read().as_ref() {
            Some(disk) => disk.contains(fingerprint).unwrap_or(false),
            None => false,
        }
    }

    /// Disk-tier failures absorbed so far
    pub fn io_warnings(&self) -> u64 {
        self.stats.lock().io_warnings
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.enabled = self.is_enabled();
        stats.memory_items = self.memory.len();
        stats.memory_bytes = self.memory.current_bytes();

        let usage = self.disk.read().as_ref().map(DiskTier::usage);
        stats.disk_enabled = usage.is_some();
        match usage {
            Some(Ok((files, bytes))) => {
                stats.disk_files = files;
                stats.disk_bytes = bytes;
            }
            Some(Err(e)) => self.io_warning("stats", e),
            None => {}
        }
        stats
    }

    /// Release both tiers. Later lookups miss and inserts are ignored.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.memory.clear();
        self.disk.write().take();
        self.loading_locks.clear();
        debug!("Cache closed ({} memory entries dropped)", dropped);
    }
}
