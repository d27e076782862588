//! Compact and Ultra-Compact Record Sets
//!
//! Sentences and citation ids repeat heavily across a record set (the same publication
//! supports many assertions). The compact form stores each distinct string once in a
//! shared array and replaces it with a `u32` index inside each record:
//!
//! ```text
//! CompactRecordSet
//! ├── sentences: ["Smoking causes cancer.", ...]   # unique sentence strings
//! ├── citations: ["1001", "1002", ...]             # unique citation ids
//! └── records:   [{ subject, object, evidence_count,
//!                   evidence: { citation_idx → [sentence_idx, ...] } }]
//! ```
//!
//! The ultra-compact form additionally interns the (name, id) pairs of subjects and
//! objects into an entity table.
//!
//! Both forms drop `predicate` and `relationship_degree`; expansion restores them to
//! their defaults and reports the loss through [`Expansion::lossy`].

use crate::record::{AssertionRecord, RelationshipDegree, DEFAULT_PREDICATE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Format tag written into compact sets
pub const COMPACT_FORMAT_VERSION: &str = "compact-v1";

/// Format tag written into ultra-compact sets
pub const ULTRA_COMPACT_FORMAT_VERSION: &str = "ultra-compact-v1";

/// Fields that do not survive a compact round trip
pub const LOSSY_FIELDS: &[&str] = &["predicate", "relationship_degree"];

/// Errors raised when a compact set references data it does not contain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("Unsupported compact format version: {0}")]
    UnsupportedVersion(String),

    #[error("Record {record}: sentence index {index} out of bounds ({len} sentences)")]
    SentenceOutOfBounds {
        record: usize,
        index: u32,
        len: usize,
    },

    #[error("Record {record}: citation index {index} out of bounds ({len} citations)")]
    CitationOutOfBounds {
        record: usize,
        index: u32,
        len: usize,
    },

    #[error("Record {record}: entity index {index} out of bounds ({len} entities)")]
    EntityOutOfBounds {
        record: usize,
        index: u32,
        len: usize,
    },
}

/// A record whose citation ids and sentences are indices into shared arrays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactRecord {
    pub subject_name: String,
    pub subject_id: String,
    pub object_name: String,
    pub object_id: String,
    pub evidence_count: u64,
    /// citation index → sentence indices
    pub evidence: BTreeMap<u32, Vec<u32>>,
}

/// Deduplicated record set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactRecordSet {
    pub version: String,
    pub sentences: Vec<String>,
    pub citations: Vec<String>,
    pub records: Vec<CompactRecord>,
}

/// Result of expanding a compact set back into full records
#[derive(Debug, Clone)]
pub struct Expansion {
    pub records: Vec<AssertionRecord>,
    /// True when some fields were reset to defaults
    pub lossy: bool,
    /// Names of the fields that were reset
    pub lossy_fields: &'static [&'static str],
}

/// Size accounting for a compact set
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CompactStats {
    pub records: usize,
    pub unique_sentences: usize,
    pub unique_citations: usize,
    /// Total sentence references across all records
    pub sentence_refs: usize,
    /// Total citation references across all records
    pub citation_refs: usize,
}

impl CompactStats {
    /// References per unique sentence (1.0 = no duplication)
    pub fn sentence_dedup_ratio(&self) -> f64 {
        if self.unique_sentences == 0 {
            0.0
        } else {
            self.sentence_refs as f64 / self.unique_sentences as f64
        }
    }

    /// References per unique citation id
    pub fn citation_dedup_ratio(&self) -> f64 {
        if self.unique_citations == 0 {
            0.0
        } else {
            self.citation_refs as f64 / self.unique_citations as f64
        }
    }
}

/// Hash-based string interner: each distinct string gets the next index.
///
/// Indices are `u32`, so a set holds at most 2^32 distinct strings of each kind.
#[derive(Default)]
struct Interner {
    indices: HashMap<String, u32>,
    values: Vec<String>,
}

impl Interner {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.indices.get(value) {
            return index;
        }
        let index = self.values.len() as u32;
        self.indices.insert(value.to_string(), index);
        self.values.push(value.to_string());
        index
    }

    fn into_values(self) -> Vec<String> {
        self.values
    }
}

/// Deduplicate sentences and citation ids across a record set
pub fn compact(records: &[AssertionRecord]) -> CompactRecordSet {
    let mut sentences = Interner::default();
    let mut citations = Interner::default();

    let compact_records = records
        .iter()
        .map(|record| CompactRecord {
            subject_name: record.subject_name.clone(),
            subject_id: record.subject_id.clone(),
            object_name: record.object_name.clone(),
            object_id: record.object_id.clone(),
            evidence_count: record.evidence_count,
            evidence: record
                .citations
                .iter()
                .map(|(citation_id, texts)| {
                    (
                        citations.intern(citation_id),
                        texts.iter().map(|s| sentences.intern(s)).collect(),
                    )
                })
                .collect(),
        })
        .collect();

    CompactRecordSet {
        version: COMPACT_FORMAT_VERSION.to_string(),
        sentences: sentences.into_values(),
        citations: citations.into_values(),
        records: compact_records,
    }
}

/// Expand a compact set into full records (free-function form of [`CompactRecordSet::expand`])
pub fn expand(set: &CompactRecordSet) -> Result<Expansion, CompactError> {
    set.expand()
}

/// Compact directly into the ultra-compact form
pub fn ultra_compact(records: &[AssertionRecord]) -> UltraCompactRecordSet {
    compact(records).to_ultra()
}

fn check_evidence(
    record: usize,
    evidence: &BTreeMap<u32, Vec<u32>>,
    citations: usize,
    sentences: usize,
) -> Result<(), CompactError> {
    for (&citation, sentence_refs) in evidence {
        if citation as usize >= citations {
            return Err(CompactError::CitationOutOfBounds {
                record,
                index: citation,
                len: citations,
            });
        }
        if let Some(&bad) = sentence_refs.iter().find(|&&s| s as usize >= sentences) {
            return Err(CompactError::SentenceOutOfBounds {
                record,
                index: bad,
                len: sentences,
            });
        }
    }
    Ok(())
}

impl CompactRecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check the version tag and that every index is within the shared arrays
    pub fn validate(&self) -> Result<(), CompactError> {
        if self.version != COMPACT_FORMAT_VERSION {
            return Err(CompactError::UnsupportedVersion(self.version.clone()));
        }
        for (position, record) in self.records.iter().enumerate() {
            check_evidence(
                position,
                &record.evidence,
                self.citations.len(),
                self.sentences.len(),
            )?;
        }
        Ok(())
    }

    /// Rebuild full records.
    ///
    /// Predicate becomes `CAUSES` and degree becomes `unknown` for every record.
    pub fn expand(&self) -> Result<Expansion, CompactError> {
        self.validate()?;

        let records = self
            .records
            .iter()
            .map(|record| AssertionRecord {
                subject_name: record.subject_name.clone(),
                subject_id: record.subject_id.clone(),
                predicate: DEFAULT_PREDICATE.to_string(),
                object_name: record.object_name.clone(),
                object_id: record.object_id.clone(),
                evidence_count: record.evidence_count,
                degree: RelationshipDegree::Unknown,
                citations: record
                    .evidence
                    .iter()
                    .map(|(&citation, sentence_refs)| {
                        (
                            self.citations[citation as usize].clone(),
                            sentence_refs
                                .iter()
                                .map(|&s| self.sentences[s as usize].clone())
                                .collect(),
                        )
                    })
                    .collect(),
            })
            .collect();

        Ok(Expansion {
            records,
            lossy: true,
            lossy_fields: LOSSY_FIELDS,
        })
    }

    pub fn stats(&self) -> CompactStats {
        let mut stats = CompactStats {
            records: self.records.len(),
            unique_sentences: self.sentences.len(),
            unique_citations: self.citations.len(),
            ..Default::default()
        };
        for record in &self.records {
            stats.citation_refs += record.evidence.len();
            stats.sentence_refs += record.evidence.values().map(Vec::len).sum::<usize>();
        }
        stats
    }

    /// Intern subject/object identities into an entity table
    pub fn to_ultra(&self) -> UltraCompactRecordSet {
        fn intern<'a>(
            index: &mut HashMap<(&'a str, &'a str), u32>,
            entities: &mut Vec<CompactEntity>,
            name: &'a str,
            id: &'a str,
        ) -> u32 {
            if let Some(&existing) = index.get(&(name, id)) {
                return existing;
            }
            let next = entities.len() as u32;
            entities.push(CompactEntity {
                name: name.to_string(),
                id: id.to_string(),
            });
            index.insert((name, id), next);
            next
        }

        let mut entity_index: HashMap<(&str, &str), u32> = HashMap::new();
        let mut entities: Vec<CompactEntity> = Vec::new();

        let records = self
            .records
            .iter()
            .map(|record| UltraCompactRecord {
                subject: intern(
                    &mut entity_index,
                    &mut entities,
                    &record.subject_name,
                    &record.subject_id,
                ),
                object: intern(
                    &mut entity_index,
                    &mut entities,
                    &record.object_name,
                    &record.object_id,
                ),
                evidence_count: record.evidence_count,
                evidence: record.evidence.clone(),
            })
            .collect();

        UltraCompactRecordSet {
            version: ULTRA_COMPACT_FORMAT_VERSION.to_string(),
            entities,
            sentences: self.sentences.clone(),
            citations: self.citations.clone(),
            records,
        }
    }
}

/// An interned subject or object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactEntity {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UltraCompactRecord {
    pub subject: u32,
    pub object: u32,
    pub evidence_count: u64,
    pub evidence: BTreeMap<u32, Vec<u32>>,
}

/// Compact set with an additional entity table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UltraCompactRecordSet {
    pub version: String,
    pub entities: Vec<CompactEntity>,
    pub sentences: Vec<String>,
    pub citations: Vec<String>,
    pub records: Vec<UltraCompactRecord>,
}

impl UltraCompactRecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn validate(&self) -> Result<(), CompactError> {
        if self.version != ULTRA_COMPACT_FORMAT_VERSION {
            return Err(CompactError::UnsupportedVersion(self.version.clone()));
        }
        for (position, record) in self.records.iter().enumerate() {
            for index in [record.subject, record.object] {
                if index as usize >= self.entities.len() {
                    return Err(CompactError::EntityOutOfBounds {
                        record: position,
                        index,
                        len: self.entities.len(),
                    });
                }
            }
            check_evidence(
                position,
                &record.evidence,
                self.citations.len(),
                self.sentences.len(),
            )?;
        }
        Ok(())
    }

    /// Resolve entity references back into a plain compact set
    pub fn to_compact(&self) -> Result<CompactRecordSet, CompactError> {
        self.validate()?;

        let records = self
            .records
            .iter()
            .map(|record| {
                let subject = &self.entities[record.subject as usize];
                let object = &self.entities[record.object as usize];
                CompactRecord {
                    subject_name: subject.name.clone(),
                    subject_id: subject.id.clone(),
                    object_name: object.name.clone(),
                    object_id: object.id.clone(),
                    evidence_count: record.evidence_count,
                    evidence: record.evidence.clone(),
                }
            })
            .collect();

        Ok(CompactRecordSet {
            version: COMPACT_FORMAT_VERSION.to_string(),
            sentences: self.sentences.clone(),
            citations: self.citations.clone(),
            records,
        })
    }

    /// Expand straight to full records
    pub fn expand(&self) -> Result<Expansion, CompactError> {
        self.to_compact()?.expand()
    }
}
