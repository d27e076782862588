//! Memory Tier
//!
//! LRU cache of shared payloads with two ceilings: item count and total estimated
//! bytes. Inserting a new entry first evicts least-recently-used entries until both
//! ceilings hold.
//!
//! Thread-safe via `parking_lot::RwLock`. Peeks take the read lock; lookups that
//! refresh recency take the write lock.

use super::CacheEntry;
use lru::LruCache;
use parking_lot::RwLock;
use std::path::Path;
use std::time::SystemTime;

/// Outcome of an insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Stored, after evicting these keys (least recent first)
    Inserted { evicted: Vec<String> },
    /// The entry alone exceeds the byte budget and was not stored
    TooLarge { bytes: usize, budget: usize },
}

struct MemoryState<V> {
    lru: LruCache<String, CacheEntry<V>>,
    current_bytes: usize,
}

pub struct MemoryTier<V> {
    max_items: usize,
    max_bytes: usize,
    state: RwLock<MemoryState<V>>,
}

impl<V> MemoryTier<V> {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            max_items: max_items.max(1),
            max_bytes,
            state: RwLock::new(MemoryState {
                // Capacity is enforced here, not by the LruCache
                lru: LruCache::unbounded(),
                current_bytes: 0,
            }),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.state.read().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().lru.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.state.read().current_bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.read().lru.contains(key)
    }

    /// Look up without touching recency
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.state.read().lru.peek(key).cloned()
    }

    /// Look up and mark as most recently used
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut state = self.state.write();
        let entry = state.lru.get_mut(key)?;
        entry.last_access = SystemTime::now();
        Some(entry.clone())
    }

    pub fn insert(&self, key: String, entry: CacheEntry<V>) -> Admission {
        let bytes = entry.estimated_bytes;
        let mut state = self.state.write();

        if let Some(previous) = state.lru.pop(&key) {
            state.current_bytes = state.current_bytes.saturating_sub(previous.estimated_bytes);
        }

        if bytes > self.max_bytes {
            return Admission::TooLarge {
                bytes,
                budget: self.max_bytes,
            };
        }

        let mut evicted = Vec::new();
        while !state.lru.is_empty()
            && (state.lru.len() >= self.max_items
                || state.current_bytes + bytes > self.max_bytes)
        {
            match state.lru.pop_lru() {
                Some((old_key, old)) => {
                    state.current_bytes = state.current_bytes.saturating_sub(old.estimated_bytes);
                    evicted.push(old_key);
                }
                None => break,
            }
        }

        state.current_bytes += bytes;
        state.lru.put(key, entry);
        Admission::Inserted { evicted }
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut state = self.state.write();
        let entry = state.lru.pop(key)?;
        state.current_bytes = state.current_bytes.saturating_sub(entry.estimated_bytes);
        Some(entry)
    }

    /// Remove every entry matching `predicate`; returns removed keys
    pub fn remove_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&CacheEntry<V>) -> bool,
    {
        let mut state = self.state.write();
        let doomed: Vec<String> = state
            .lru
            .iter()
            .filter(|(_, entry)| predicate(*entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = state.lru.pop(key) {
                state.current_bytes = state.current_bytes.saturating_sub(entry.estimated_bytes);
            }
        }
        doomed
    }

    /// Remove every entry built from `source`
    pub fn remove_source(&self, source: &Path) -> Vec<String> {
        self.remove_where(|entry| entry.source.path.as_path() == source)
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.state
            .read()
            .lru
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn clear(&self) -> usize {
        let mut state = self.state.write();
        let count = state.lru.len();
        state.lru.clear();
        state.current_bytes = 0;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cacheable;
    use crate::fingerprint::SourceStamp;
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    struct Blob(usize);

    impl Cacheable for Blob {
        fn estimated_bytes(&self) -> usize {
            self.0
        }
    }

    fn entry(bytes: usize, source: &str) -> CacheEntry<Blob> {
        CacheEntry::new(
            Arc::new(Blob(bytes)),
            SourceStamp {
                path: PathBuf::from(source),
                size: 1,
                mtime_nanos: 1,
            },
        )
    }

    #[test]
    fn test_item_ceiling_evicts_lru() {
        let tier = MemoryTier::new(2, 1_000_000);
        tier.insert("a".into(), entry(10, "/a"));
        tier.insert("b".into(), entry(10, "/b"));

        let admission = tier.insert("c".into(), entry(10, "/c"));
        assert_eq!(
            admission,
            Admission::Inserted {
                evicted: vec!["a".to_string()]
            }
        );
        assert!(!tier.contains("a"));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let tier = MemoryTier::new(2, 1_000_000);
        tier.insert("a".into(), entry(10, "/a"));
        tier.insert("b".into(), entry(10, "/b"));
        assert!(tier.get("a").is_some());

        tier.insert("c".into(), entry(10, "/c"));
        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert_eq!(tier.keys_by_recency(), vec!["c", "a"]);
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let tier = MemoryTier::new(2, 1_000_000);
        tier.insert("a".into(), entry(10, "/a"));
        tier.insert("b".into(), entry(10, "/b"));
        assert!(tier.peek("a").is_some());

        tier.insert("c".into(), entry(10, "/c"));
        assert!(!tier.contains("a"));
    }

    #[test]
    fn test_byte_ceiling_evicts() {
        let tier = MemoryTier::new(10, 100);
        tier.insert("a".into(), entry(40, "/a"));
        tier.insert("b".into(), entry(40, "/b"));
        assert_eq!(tier.current_bytes(), 80);

        let admission = tier.insert("c".into(), entry(50, "/c"));
        assert_eq!(
            admission,
            Admission::Inserted {
                evicted: vec!["a".to_string()]
            }
        );
        assert_eq!(tier.current_bytes(), 90);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let tier = MemoryTier::new(10, 100);
        tier.insert("a".into(), entry(40, "/a"));
        assert_eq!(
            tier.insert("big".into(), entry(500, "/big")),
            Admission::TooLarge {
                bytes: 500,
                budget: 100
            }
        );
        assert!(tier.contains("a"));
        assert!(!tier.contains("big"));
    }

    #[test]
    fn test_replace_same_key_adjusts_bytes() {
        let tier = MemoryTier::new(10, 1000);
        tier.insert("a".into(), entry(40, "/a"));
        tier.insert("a".into(), entry(10, "/a"));
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.current_bytes(), 10);
    }

    #[test]
    fn test_remove_source() {
        let tier = MemoryTier::new(10, 1000);
        tier.insert("a1".into(), entry(10, "/a"));
        tier.insert("a2".into(), entry(10, "/a"));
        tier.insert("b".into(), entry(10, "/b"));

        let mut removed = tier.remove_source(Path::new("/a"));
        removed.sort();
        assert_eq!(removed, vec!["a1", "a2"]);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.current_bytes(), 10);
    }

    #[test]
    fn test_remove_and_clear() {
        let tier = MemoryTier::new(10, 1000);
        tier.insert("a".into(), entry(10, "/a"));
        tier.insert("b".into(), entry(10, "/b"));

        assert!(tier.remove("a").is_some());
        assert!(tier.remove("a").is_none());
        assert_eq!(tier.clear(), 1);
        assert!(tier.is_empty());
        assert_eq!(tier.current_bytes(), 0);
    }
}
