//! Cache Fingerprints
//!
//! A fingerprint identifies one loadable state of a source file: SHA-256 over the
//! canonical path, file size, modification time and any extra loading parameters.
//! Editing or touching the file yields a new fingerprint.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Extension of disk-tier cache files
pub const CACHE_FILE_EXTENSION: &str = "cwcache";

/// Size and modification time of a source file at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceStamp {
    /// Canonical absolute path
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_nanos: i128,
}

impl SourceStamp {
    /// Stat a file. Fails with `NotFound` if it does not exist.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            path,
            size: metadata.len(),
            mtime_nanos: system_time_nanos(metadata.modified()?),
        })
    }

    /// Whether `current` describes a different file state than `self`
    pub fn is_stale(&self, current: &SourceStamp) -> bool {
        self.size != current.size || self.mtime_nanos != current.mtime_nanos
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Nanoseconds since the epoch (negative before it)
pub fn system_time_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}

/// Extra loading parameters folded into a fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FingerprintParams(BTreeMap<String, String>);

impl FingerprintParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Deterministic identity of a cacheable load
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheFingerprint {
    hash: String,
    stamp: SourceStamp,
}

impl CacheFingerprint {
    /// Stat `path` and fingerprint it with `params`
    pub fn compute(path: &Path, params: &FingerprintParams) -> std::io::Result<Self> {
        Ok(Self::from_stamp(SourceStamp::of(path)?, params))
    }

    pub fn from_stamp(stamp: SourceStamp, params: &FingerprintParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(stamp.path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(stamp.size.to_le_bytes());
        hasher.update(stamp.mtime_nanos.to_le_bytes());
        for (key, value) in &params.0 {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        Self {
            hash: format!("{:x}", hasher.finalize()),
            stamp,
        }
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters, for logs
    pub fn short(&self) -> &str {
        &self.hash[..12]
    }

    pub fn stamp(&self) -> &SourceStamp {
        &self.stamp
    }

    pub fn source_path(&self) -> &Path {
        &self.stamp.path
    }

    /// Disk-tier file name
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.hash, CACHE_FILE_EXTENSION)
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}
