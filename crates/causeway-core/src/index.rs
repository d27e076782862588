//! Edge Index
//!
//! O(1) lookup of a record by its (subject, object) pair. Keys are built from
//! normalized names:
//!
//! ```text
//! "Lung Cancer" → "lung_cancer"
//! key = "{normalized_subject} -> {normalized_object}"
//! ```
//!
//! With synonym expansion enabled, every record is also reachable through the
//! synonyms of its subject and object. Collision policy:
//!
//! 1. Keys from real records always win over synonym-derived keys.
//! 2. Among records with the same key, the first record wins.
//! 3. Among synonym-derived keys, the first derived entry wins.
//!
//! Collisions are counted in [`IndexStats`], never silently overwritten.

use crate::record::{AssertionRecord, EdgeSource, RecordMetadata, RelationshipDegree};
use crate::synonyms::SynonymTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("No edge indexed for '{subject}' -> '{object}'")]
    EdgeNotFound { subject: String, object: String },
}

/// Normalize a concept name for indexing.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a single
/// underscore and trims leading/trailing underscores.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Index key for two already-normalized names
pub fn edge_key(normalized_subject: &str, normalized_object: &str) -> String {
    format!("{} -> {}", normalized_subject, normalized_object)
}

/// Index key for two raw names
pub fn edge_key_for(subject: &str, object: &str) -> String {
    edge_key(&normalize_name(subject), &normalize_name(object))
}

/// What the index knows about one edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeIndexEntry {
    pub normalized_subject: String,
    pub normalized_object: String,
    /// Position of the record in the indexed collection
    pub position: usize,
    pub evidence_count: u64,
    pub degree: RelationshipDegree,
    pub predicate: String,
    pub subject_id: String,
    pub object_id: String,
    pub subject_name: String,
    pub object_name: String,
}

impl EdgeIndexEntry {
    pub fn from_source<T: EdgeSource>(position: usize, record: &T) -> Self {
        Self {
            normalized_subject: normalize_name(record.subject_name()),
            normalized_object: normalize_name(record.object_name()),
            position,
            evidence_count: record.evidence_count(),
            degree: record.degree(),
            predicate: record.predicate().to_string(),
            subject_id: record.subject_id().to_string(),
            object_id: record.object_id().to_string(),
            subject_name: record.subject_name().to_string(),
            object_name: record.object_name().to_string(),
        }
    }
}

/// How a key entered the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Direct,
    Synonym,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Arc<EdgeIndexEntry>,
    origin: KeyOrigin,
}

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub records_indexed: usize,
    /// Records without the identity fields needed for a key
    pub skipped_unindexable: usize,
    pub direct_keys: usize,
    pub synonym_keys: usize,
    /// Later records whose key was already taken by an earlier record
    pub direct_duplicates: usize,
    /// Synonym keys dropped because the key was already taken
    pub synonym_collisions: usize,
}

/// Normalized (subject, object) → entry map
#[derive(Debug, Clone, Default)]
pub struct EdgeIndex {
    slots: HashMap<String, Slot>,
    stats: IndexStats,
}

fn is_indexable<T: EdgeSource>(record: &T) -> bool {
    !record.subject_name().trim().is_empty()
        && !record.subject_id().trim().is_empty()
        && !record.object_name().trim().is_empty()
        && !record.object_id().trim().is_empty()
}

impl EdgeIndex {
    /// Build over any record view, optionally expanding through the built-in synonym table
    pub fn build<T: EdgeSource + Sync>(records: &[T], expand_synonyms: bool) -> Self {
        if expand_synonyms {
            let table = SynonymTable::builtin();
            Self::build_with(records, Some(table.as_ref()))
        } else {
            Self::build_with(records, None)
        }
    }

    /// Build with an explicit synonym table (or none)
    pub fn build_with<T: EdgeSource + Sync>(
        records: &[T],
        synonyms: Option<&SynonymTable>,
    ) -> Self {
        let entries: Vec<Option<Arc<EdgeIndexEntry>>> = records
            .par_iter()
            .enumerate()
            .map(|(position, record)| {
                if !is_indexable(record) {
                    return None;
                }
                let entry = EdgeIndexEntry::from_source(position, record);
                if entry.normalized_subject.is_empty() || entry.normalized_object.is_empty() {
                    return None;
                }
                Some(Arc::new(entry))
            })
            .collect();

        let mut index = Self {
            slots: HashMap::with_capacity(entries.len()),
            stats: IndexStats::default(),
        };

        // Direct keys first so no synonym can claim a real record's key
        for entry in &entries {
            let Some(entry) = entry else {
                index.stats.skipped_unindexable += 1;
                continue;
            };
            index.stats.records_indexed += 1;
            let key = edge_key(&entry.normalized_subject, &entry.normalized_object);
            match index.slots.entry(key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot {
                        entry: Arc::clone(entry),
                        origin: KeyOrigin::Direct,
                    });
                    index.stats.direct_keys += 1;
                }
                Entry::Occupied(_) => index.stats.direct_duplicates += 1,
            }
        }

        if let Some(table) = synonyms.filter(|t| !t.is_empty()) {
            for entry in entries.iter().flatten() {
                index.insert_synonyms(entry, table);
            }
        }

        debug!(
            "Built edge index: {} direct keys, {} synonym keys, {} skipped",
            index.stats.direct_keys, index.stats.synonym_keys, index.stats.skipped_unindexable
        );
        index
    }

    fn insert_synonyms(&mut self, entry: &Arc<EdgeIndexEntry>, table: &SynonymTable) {
        let subjects = table.variants_of(&entry.normalized_subject);
        let objects = table.variants_of(&entry.normalized_object);
        if subjects.len() == 1 && objects.len() == 1 {
            return;
        }

        for subject in &subjects {
            for object in &objects {
                if *subject == entry.normalized_subject && *object == entry.normalized_object {
                    continue;
                }
                match self.slots.entry(edge_key(subject, object)) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(Slot {
                            entry: Arc::clone(entry),
                            origin: KeyOrigin::Synonym,
                        });
                        self.stats.synonym_keys += 1;
                    }
                    Entry::Occupied(occupied) => {
                        if occupied.get().entry.position != entry.position {
                            self.stats.synonym_collisions += 1;
                        }
                    }
                }
            }
        }
    }

    /// Look up an edge by raw names
    pub fn lookup(&self, subject: &str, object: &str) -> Option<&EdgeIndexEntry> {
        self.lookup_key(&edge_key_for(subject, object))
    }

    /// Look up an edge, reporting a miss as [`IndexError::EdgeNotFound`]
    pub fn lookup_edge(&self, subject: &str, object: &str) -> Result<&EdgeIndexEntry, IndexError> {
        self.lookup(subject, object)
            .ok_or_else(|| IndexError::EdgeNotFound {
                subject: subject.to_string(),
                object: object.to_string(),
            })
    }

    /// Look up by a prebuilt key
    pub fn lookup_key(&self, key: &str) -> Option<&EdgeIndexEntry> {
        self.slots.get(key).map(|slot| slot.entry.as_ref())
    }

    /// How the key for these names entered the index
    pub fn key_origin(&self, subject: &str, object: &str) -> Option<KeyOrigin> {
        self.slots
            .get(&edge_key_for(subject, object))
            .map(|slot| slot.origin)
    }

    pub fn contains(&self, subject: &str, object: &str) -> bool {
        self.slots.contains_key(&edge_key_for(subject, object))
    }

    /// Number of keys (direct + synonym)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// Builds edge indexes for load results
pub trait EdgeIndexProvider: Send + Sync {
    fn index_records(&self, records: &[AssertionRecord]) -> EdgeIndex;
    fn index_metadata(&self, metadata: &[RecordMetadata]) -> EdgeIndex;
}

/// Default provider: plain keys, plus synonym keys when a table is configured
#[derive(Debug, Clone, Default)]
pub struct SynonymIndexProvider {
    synonyms: Option<Arc<SynonymTable>>,
}

impl SynonymIndexProvider {
    /// Provider without synonym expansion
    pub fn plain() -> Self {
        Self { synonyms: None }
    }

    /// Provider using the built-in synonym table
    pub fn with_builtin_synonyms() -> Self {
        Self {
            synonyms: Some(SynonymTable::builtin()),
        }
    }

    pub fn with_table(table: Arc<SynonymTable>) -> Self {
        Self {
            synonyms: Some(table),
        }
    }

    pub fn expands_synonyms(&self) -> bool {
        self.synonyms.is_some()
    }
}

impl EdgeIndexProvider for SynonymIndexProvider {
    fn index_records(&self, records: &[AssertionRecord]) -> EdgeIndex {
        EdgeIndex::build_with(records, self.synonyms.as_deref())
    }

    fn index_metadata(&self, metadata: &[RecordMetadata]) -> EdgeIndex {
        EdgeIndex::build_with(metadata, self.synonyms.as_deref())
    }
}
