//! Disk Tier
//!
//! One file per fingerprint under the cache directory, framed with the snapshot codec
//! (`PayloadKind::CacheEntry`) so truncation and bit rot are caught by the checksum.
//! A SQLite catalog tracks each file's source state, size and access time.
//!
//! ```text
//! <cache dir>/
//! ├── catalog.db
//! ├── 3f9a…e1.cwcache
//! └── 7c02…4b.cwcache
//! ```
//!
//! Corrupt or unreadable cache files are deleted on read and reported as
//! [`DiskRead::Corrupt`], never as an error.

use super::catalog::{clamp_mtime, CacheCatalog, CatalogEntry, CATALOG_FILE_NAME};
use super::CacheError;
use crate::codec::{decode_payload, encode_payload, write_atomic, Compression, PayloadKind};
use crate::fingerprint::{CacheFingerprint, SourceStamp, CACHE_FILE_EXTENSION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of a disk-tier read
#[derive(Debug)]
pub enum DiskRead<V> {
    Hit(V),
    Miss,
    /// A file existed but could not be decoded; it has been removed
    Corrupt(String),
}

/// What a maintenance sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PruneReport {
    /// Catalog rows whose cache file was missing
    pub missing_files: usize,
    /// Cache files with no catalog row
    pub orphan_files: usize,
    /// Entries whose source file changed or disappeared
    pub stale_entries: usize,
    /// Leftover temp files from interrupted writes
    pub temp_files: usize,
    pub bytes_freed: u64,
}

impl PruneReport {
    pub fn total_removed(&self) -> usize {
        self.missing_files + self.orphan_files + self.stale_entries + self.temp_files
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct DiskTier {
    dir: PathBuf,
    catalog: CacheCatalog,
    max_bytes: u64,
    compression: Compression,
}

impl DiskTier {
    /// Open (creating if needed) a disk tier rooted at `dir`
    pub fn open(dir: &Path, max_bytes: u64, compression: Compression) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let catalog = CacheCatalog::open(&dir.join(CATALOG_FILE_NAME))?;
        debug!("Opened disk cache at {:?}", dir);
        Ok(Self {
            dir: dir.to_path_buf(),
            catalog,
            max_bytes,
            compression,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn entry_path(&self, fingerprint: &CacheFingerprint) -> PathBuf {
        self.dir.join(fingerprint.file_name())
    }

    pub fn contains(&self, fingerprint: &CacheFingerprint) -> Result<bool, CacheError> {
        Ok(self.catalog.get(fingerprint.as_str())?.is_some())
    }

    /// Read and decode the payload for `fingerprint`
    pub fn read<V: DeserializeOwned>(
        &self,
        fingerprint: &CacheFingerprint,
    ) -> Result<DiskRead<V>, CacheError> {
        let Some(entry) = self.catalog.get(fingerprint.as_str())? else {
            return Ok(DiskRead::Miss);
        };
        let path = self.dir.join(&entry.file_name);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.catalog.remove(&entry.fingerprint)?;
                return Ok(DiskRead::Miss);
            }
            Err(e) => return Err(e.into()),
        };

        match decode_payload::<V>(&bytes, PayloadKind::CacheEntry) {
            Ok(value) => {
                self.catalog.touch(&entry.fingerprint, unix_now())?;
                Ok(DiskRead::Hit(value))
            }
            Err(e) => {
                warn!(
                    "Removing corrupt cache file {:?}: {}",
                    path.file_name().unwrap_or_default(),
                    e
                );
                self.remove_entry(&entry)?;
                Ok(DiskRead::Corrupt(e.to_string()))
            }
        }
    }

    /// Persist a payload; returns the number of entries evicted to stay within budget
    pub fn write<V: Serialize>(
        &self,
        fingerprint: &CacheFingerprint,
        value: &V,
    ) -> Result<usize, CacheError> {
        let bytes = encode_payload(PayloadKind::CacheEntry, value, self.compression)?;
        let file_name = fingerprint.file_name();
        write_atomic(&self.dir.join(&file_name), &bytes)?;

        let stamp = fingerprint.stamp();
        let now = unix_now();
        self.catalog.upsert(&CatalogEntry {
            fingerprint: fingerprint.as_str().to_string(),
            source_path: stamp.path_str(),
            source_size: stamp.size,
            source_mtime: clamp_mtime(stamp.mtime_nanos),
            file_name,
            byte_size: bytes.len() as u64,
            created_at: now,
            accessed_at: now,
            hits: 0,
        })?;
        debug!(
            "Persisted cache entry {} ({} bytes)",
            fingerprint.short(),
            bytes.len()
        );

        self.enforce_budget(Some(fingerprint.as_str()))
    }

    fn remove_entry(&self, entry: &CatalogEntry) -> Result<u64, CacheError> {
        match std::fs::remove_file(self.dir.join(&entry.file_name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.catalog.remove(&entry.fingerprint)?;
        Ok(entry.byte_size)
    }

    pub fn remove(&self, fingerprint: &str) -> Result<bool, CacheError> {
        match self.catalog.get(fingerprint)? {
            Some(entry) => {
                self.remove_entry(&entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop entries for `current.path` built from a different file state
    pub fn invalidate_stale(&self, current: &SourceStamp) -> Result<usize, CacheError> {
        let mtime = clamp_mtime(current.mtime_nanos);
        let mut removed = 0;
        for entry in self.catalog.entries_for_source(&current.path_str())? {
            if entry.source_size != current.size || entry.source_mtime != mtime {
                self.remove_entry(&entry)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Invalidated {} stale disk entries for {:?}", removed, current.path);
        }
        Ok(removed)
    }

    /// Drop every entry built from `source`
    pub fn remove_source(&self, source: &Path) -> Result<usize, CacheError> {
        let entries = self
            .catalog
            .entries_for_source(&source.to_string_lossy())?;
        for entry in &entries {
            self.remove_entry(entry)?;
        }
        Ok(entries.len())
    }

    /// Evict least-recently-accessed entries until the tier fits its budget.
    ///
    /// `protect` is never evicted (the entry just written).
    pub fn enforce_budget(&self, protect: Option<&str>) -> Result<usize, CacheError> {
        let mut total = self.catalog.total_bytes()?;
        if total <= self.max_bytes {
            return Ok(0);
        }

        let mut evicted = 0;
        for entry in self.catalog.entries_lru()? {
            if total <= self.max_bytes {
                break;
            }
            if Some(entry.fingerprint.as_str()) == protect {
                continue;
            }
            total = total.saturating_sub(self.remove_entry(&entry)?);
            evicted += 1;
        }
        if evicted > 0 {
            info!(
                "Evicted {} disk cache entries to fit {} byte budget",
                evicted, self.max_bytes
            );
        }
        Ok(evicted)
    }

    /// Remove missing, orphaned, stale and temporary files
    pub fn prune(&self) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        let mut known = HashSet::new();

        for entry in self.catalog.entries_lru()? {
            let path = self.dir.join(&entry.file_name);
            if !path.exists() {
                self.catalog.remove(&entry.fingerprint)?;
                report.missing_files += 1;
                continue;
            }

            let stale = match SourceStamp::of(Path::new(&entry.source_path)) {
                Ok(current) => {
                    current.size != entry.source_size
                        || clamp_mtime(current.mtime_nanos) != entry.source_mtime
                }
                Err(_) => true,
            };
            if stale {
                report.bytes_freed += self.remove_entry(&entry)?;
                report.stale_entries += 1;
                continue;
            }
            known.insert(entry.file_name);
        }

        for dir_entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            let is_temp = name.starts_with('.') && name.ends_with(".tmp");
            let is_orphan = name.ends_with(&format!(".{}", CACHE_FILE_EXTENSION))
                && !known.contains(&name);
            if !is_temp && !is_orphan {
                continue;
            }

            let size = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
            match std::fs::remove_file(dir_entry.path()) {
                Ok(()) => {
                    report.bytes_freed += size;
                    if is_temp {
                        report.temp_files += 1;
                    } else {
                        report.orphan_files += 1;
                    }
                }
                Err(e) => warn!("Failed to remove {:?}: {}", dir_entry.path(), e),
            }
        }

        info!(
            "Pruned disk cache: {} removed, {} bytes freed",
            report.total_removed(),
            report.bytes_freed
        );
        Ok(report)
    }

    /// Remove every entry; returns how many were removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = self.catalog.entries_lru()?;
        for entry in &entries {
            self.remove_entry(entry)?;
        }
        Ok(entries.len())
    }

    /// (file count, total bytes) according to the catalog
    pub fn usage(&self) -> Result<(usize, u64), CacheError> {
        Ok((self.catalog.count()?, self.catalog.total_bytes()?))
    }

    pub fn catalog(&self) -> &CacheCatalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintParams;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn source(temp: &TempDir, name: &str) -> PathBuf {
        let path = temp.path().join(name);
        std::fs::write(&path, "[]").unwrap();
        path
    }

    fn fingerprint(path: &Path) -> CacheFingerprint {
        CacheFingerprint::compute(path, &FingerprintParams::new()).unwrap()
    }

    fn tier(temp: &TempDir, max_bytes: u64) -> DiskTier {
        DiskTier::open(&temp.path().join("cache"), max_bytes, Compression::default()).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let fp = fingerprint(&source(&temp, "a.json"));

        disk.write(&fp, &vec!["x".to_string(), "y".to_string()])
            .unwrap();
        assert!(disk.contains(&fp).unwrap());
        assert!(disk.entry_path(&fp).exists());

        match disk.read::<Vec<String>>(&fp).unwrap() {
            DiskRead::Hit(value) => assert_eq!(value, vec!["x", "y"]),
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(disk.catalog().get(fp.as_str()).unwrap().unwrap().hits, 1);
    }

    #[test]
    fn test_read_unknown_is_miss() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let fp = fingerprint(&source(&temp, "a.json"));
        assert!(matches!(
            disk.read::<Vec<String>>(&fp).unwrap(),
            DiskRead::Miss
        ));
    }

    #[test]
    fn test_corrupt_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let fp = fingerprint(&source(&temp, "a.json"));
        disk.write(&fp, &vec![1u32, 2, 3]).unwrap();

        std::fs::write(disk.entry_path(&fp), b"garbage").unwrap();

        assert!(matches!(
            disk.read::<Vec<u32>>(&fp).unwrap(),
            DiskRead::Corrupt(_)
        ));
        assert!(!disk.entry_path(&fp).exists());
        assert!(!disk.contains(&fp).unwrap());
    }

    #[test]
    fn test_deleted_file_is_miss() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let fp = fingerprint(&source(&temp, "a.json"));
        disk.write(&fp, &vec![1u32]).unwrap();
        std::fs::remove_file(disk.entry_path(&fp)).unwrap();

        assert!(matches!(disk.read::<Vec<u32>>(&fp).unwrap(), DiskRead::Miss));
        assert!(!disk.contains(&fp).unwrap());
    }

    #[test]
    fn test_invalidate_stale() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let path = source(&temp, "a.json");
        let old = fingerprint(&path);
        disk.write(&old, &vec![1u32]).unwrap();

        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        let current = fingerprint(&path);

        assert_eq!(disk.invalidate_stale(current.stamp()).unwrap(), 1);
        assert!(!disk.contains(&old).unwrap());
        assert!(!disk.entry_path(&old).exists());
    }

    #[test]
    fn test_budget_evicts_least_recent() {
        let temp = TempDir::new().unwrap();
        let payload: Vec<u64> = (0..200).collect();
        let sizing = tier(&temp, u64::MAX);
        let probe = fingerprint(&source(&temp, "probe.json"));
        sizing.write(&probe, &payload).unwrap();
        let one_entry = sizing.usage().unwrap().1;
        sizing.clear().unwrap();
        drop(sizing);

        // Room for two entries, not three
        let disk = tier(&temp, one_entry * 2 + one_entry / 2);
        let fps: Vec<_> = ["a.json", "b.json", "c.json"]
            .iter()
            .map(|name| fingerprint(&source(&temp, name)))
            .collect();
        disk.write(&fps[0], &payload).unwrap();
        disk.write(&fps[1], &payload).unwrap();
        let evicted = disk.write(&fps[2], &payload).unwrap();

        assert_eq!(evicted, 1);
        assert!(!disk.contains(&fps[0]).unwrap());
        assert!(disk.contains(&fps[1]).unwrap());
        assert!(disk.contains(&fps[2]).unwrap());
    }

    #[test]
    fn test_prune() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);

        let kept = fingerprint(&source(&temp, "kept.json"));
        disk.write(&kept, &vec![1u32]).unwrap();

        let gone_path = source(&temp, "gone.json");
        let gone = fingerprint(&gone_path);
        disk.write(&gone, &vec![2u32]).unwrap();
        std::fs::remove_file(&gone_path).unwrap();

        std::fs::write(disk.dir().join("deadbeef.cwcache"), b"orphan").unwrap();
        std::fs::write(disk.dir().join(".x.cwcache.1.0.tmp"), b"partial").unwrap();

        let report = disk.prune().unwrap();
        assert_eq!(report.stale_entries, 1);
        assert_eq!(report.orphan_files, 1);
        assert_eq!(report.temp_files, 1);
        assert!(disk.contains(&kept).unwrap());
        assert!(!disk.contains(&gone).unwrap());
        assert!(disk.dir().join(CATALOG_FILE_NAME).exists());
    }

    #[test]
    fn test_clear_and_remove_source() {
        let temp = TempDir::new().unwrap();
        let disk = tier(&temp, u64::MAX);
        let path = source(&temp, "a.json");
        let fp = fingerprint(&path);
        disk.write(&fp, &vec![1u32]).unwrap();

        assert_eq!(disk.remove_source(fp.source_path()).unwrap(), 1);
        assert_eq!(disk.usage().unwrap(), (0, 0));

        disk.write(&fp, &vec![1u32]).unwrap();
        assert_eq!(disk.clear().unwrap(), 1);
        assert!(!disk.entry_path(&fp).exists());
    }
}
