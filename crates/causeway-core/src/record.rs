//! Assertion Record Model
//!
//! Core data types for causal assertion records:
//! - [`AssertionRecord`]: one subject → predicate → object fact with its literature evidence
//! - [`RecordMetadata`]: the lightweight projection (no sentence text) served for large sets
//! - [`EdgeSource`]: the read-only view the edge index builds from
//!
//! Records are plain owned data. Sharing across the cache, loader and index goes through
//! `Arc<Vec<AssertionRecord>>` rather than references.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Predicate used when a source record omits one.
pub const DEFAULT_PREDICATE: &str = "CAUSES";

/// Constants for memory estimation
const RECORD_BASE_SIZE: usize = 208; // AssertionRecord struct + BTreeMap header
const CITATION_BASE_SIZE: usize = 72; // BTreeMap node share + key String + Vec header
const SENTENCE_BASE_SIZE: usize = 24; // String header
const METADATA_BASE_SIZE: usize = 200; // RecordMetadata struct
const HEAP_OVERHEAD: f64 = 1.2; // allocator slack

/// Distance of a relationship from the queried concept.
///
/// Serialized in the interchange format as `"1"`, `"2"`, `"3"` or `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RelationshipDegree {
    First,
    Second,
    Third,
    #[default]
    Unknown,
}

impl RelationshipDegree {
    /// Interchange-format tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "1",
            Self::Second => "2",
            Self::Third => "3",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a degree tag. Anything unrecognised maps to `Unknown`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "1" | "first" => Self::First,
            "2" | "second" => Self::Second,
            "3" | "third" => Self::Third,
            _ => Self::Unknown,
        }
    }

    /// Degree from a numeric tag (1..=3)
    pub fn from_number(n: u64) -> Self {
        match n {
            1 => Self::First,
            2 => Self::Second,
            3 => Self::Third,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RelationshipDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One causal relationship with its supporting literature.
///
/// `citations` maps a citation id (e.g. a PubMed id) to the sentences that support the
/// assertion in that publication. Citation ids are unique within a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub subject_name: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_name: String,
    pub object_id: String,
    pub evidence_count: u64,
    pub degree: RelationshipDegree,
    pub citations: BTreeMap<String, Vec<String>>,
}

impl AssertionRecord {
    /// Create a record with the default predicate, unknown degree and no citations
    pub fn new(
        subject_name: impl Into<String>,
        subject_id: impl Into<String>,
        object_name: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_name: subject_name.into(),
            subject_id: subject_id.into(),
            predicate: DEFAULT_PREDICATE.to_string(),
            object_name: object_name.into(),
            object_id: object_id.into(),
            evidence_count: 0,
            degree: RelationshipDegree::Unknown,
            citations: BTreeMap::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = predicate.into();
        self
    }

    pub fn with_degree(mut self, degree: RelationshipDegree) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_evidence_count(mut self, count: u64) -> Self {
        self.evidence_count = count;
        self
    }

    /// Add a citation with its supporting sentences.
    ///
    /// Bumps `evidence_count` so it never falls below the number of citations.
    pub fn with_citation<I, S>(mut self, citation_id: impl Into<String>, sentences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.citations.insert(
            citation_id.into(),
            sentences.into_iter().map(Into::into).collect(),
        );
        self.evidence_count = self.evidence_count.max(self.citations.len() as u64);
        self
    }

    /// Whether the record has the identity fields needed for indexing
    pub fn is_indexable(&self) -> bool {
        !self.subject_name.trim().is_empty()
            && !self.subject_id.trim().is_empty()
            && !self.object_name.trim().is_empty()
            && !self.object_id.trim().is_empty()
    }

    pub fn citation_count(&self) -> usize {
        self.citations.len()
    }

    pub fn sentence_count(&self) -> usize {
        self.citations.values().map(Vec::len).sum()
    }

    /// Citation ids in key order
    pub fn citation_ids(&self) -> Vec<String> {
        self.citations.keys().cloned().collect()
    }

    /// Estimate the heap footprint of this record in bytes
    pub fn estimated_bytes(&self) -> usize {
        let strings = self.subject_name.len()
            + self.subject_id.len()
            + self.predicate.len()
            + self.object_name.len()
            + self.object_id.len();
        let citations: usize = self
            .citations
            .iter()
            .map(|(id, sentences)| {
                CITATION_BASE_SIZE
                    + id.len()
                    + sentences
                        .iter()
                        .map(|s| SENTENCE_BASE_SIZE + s.len())
                        .sum::<usize>()
            })
            .sum();
        ((RECORD_BASE_SIZE + strings + citations) as f64 * HEAP_OVERHEAD) as usize
    }
}

/// Lightweight projection of a record: identity, predicate, counts and citation ids,
/// without any sentence text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Position of the source record in its record set
    pub position: usize,
    pub subject_name: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_name: String,
    pub object_id: String,
    pub evidence_count: u64,
    pub degree: RelationshipDegree,
    pub citation_ids: Vec<String>,
}

impl RecordMetadata {
    pub fn from_record(position: usize, record: &AssertionRecord) -> Self {
        Self {
            position,
            subject_name: record.subject_name.clone(),
            subject_id: record.subject_id.clone(),
            predicate: record.predicate.clone(),
            object_name: record.object_name.clone(),
            object_id: record.object_id.clone(),
            evidence_count: record.evidence_count,
            degree: record.degree,
            citation_ids: record.citation_ids(),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        let strings = self.subject_name.len()
            + self.subject_id.len()
            + self.predicate.len()
            + self.object_name.len()
            + self.object_id.len()
            + self
                .citation_ids
                .iter()
                .map(|c| SENTENCE_BASE_SIZE + c.len())
                .sum::<usize>();
        ((METADATA_BASE_SIZE + strings) as f64 * HEAP_OVERHEAD) as usize
    }
}

/// Project a record set onto its metadata view (parallel over records)
pub fn project_metadata(records: &[AssertionRecord]) -> Vec<RecordMetadata> {
    records
        .par_iter()
        .enumerate()
        .map(|(position, record)| RecordMetadata::from_record(position, record))
        .collect()
}

/// Read-only identity view shared by full records and metadata projections.
///
/// The edge index is built over anything implementing this trait, so metadata-only
/// load results can be indexed without materialising sentence text.
pub trait EdgeSource {
    fn subject_name(&self) -> &str;
    fn subject_id(&self) -> &str;
    fn object_name(&self) -> &str;
    fn object_id(&self) -> &str;
    fn predicate(&self) -> &str;
    fn evidence_count(&self) -> u64;
    fn degree(&self) -> RelationshipDegree;
}

macro_rules! impl_edge_source {
    ($ty:ty) => {
        impl EdgeSource for $ty {
            fn subject_name(&self) -> &str {
                &self.subject_name
            }
            fn subject_id(&self) -> &str {
                &self.subject_id
            }
            fn object_name(&self) -> &str {
                &self.object_name
            }
            fn object_id(&self) -> &str {
                &self.object_id
            }
            fn predicate(&self) -> &str {
                &self.predicate
            }
            fn evidence_count(&self) -> u64 {
                self.evidence_count
            }
            fn degree(&self) -> RelationshipDegree {
                self.degree
            }
        }
    };
}

impl_edge_source!(AssertionRecord);
impl_edge_source!(RecordMetadata);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AssertionRecord {
        AssertionRecord::new("Smoking", "C0037369", "Lung Cancer", "C0242379")
            .with_degree(RelationshipDegree::First)
            .with_citation("1001", ["Smoking causes lung cancer."])
            .with_citation("1002", ["Tobacco smoke is carcinogenic.", "Risk rises."])
    }

    #[test]
    fn test_degree_parse() {
        assert_eq!(RelationshipDegree::parse("1"), RelationshipDegree::First);
        assert_eq!(RelationshipDegree::parse(" 3 "), RelationshipDegree::Third);
        assert_eq!(RelationshipDegree::parse("Unknown"), RelationshipDegree::Unknown);
        assert_eq!(RelationshipDegree::parse("7"), RelationshipDegree::Unknown);
        assert_eq!(RelationshipDegree::from_number(2), RelationshipDegree::Second);
        assert_eq!(RelationshipDegree::Second.to_string(), "2");
    }

    #[test]
    fn test_record_defaults() {
        let record = AssertionRecord::new("A", "C1", "B", "C2");
        assert_eq!(record.predicate, DEFAULT_PREDICATE);
        assert_eq!(record.degree, RelationshipDegree::Unknown);
        assert_eq!(record.evidence_count, 0);
        assert!(record.is_indexable());
    }

    #[test]
    fn test_record_not_indexable_with_blank_ids() {
        let record = AssertionRecord::new("A", "  ", "B", "C2");
        assert!(!record.is_indexable());
        let record = AssertionRecord::new("A", "C1", "", "C2");
        assert!(!record.is_indexable());
    }

    #[test]
    fn test_citation_counts() {
        let record = sample();
        assert_eq!(record.citation_count(), 2);
        assert_eq!(record.sentence_count(), 3);
        assert_eq!(record.evidence_count, 2);
        assert_eq!(record.citation_ids(), vec!["1001", "1002"]);
    }

    #[test]
    fn test_explicit_evidence_count_is_kept() {
        let record = AssertionRecord::new("A", "C1", "B", "C2")
            .with_evidence_count(40)
            .with_citation("1", ["s"]);
        assert_eq!(record.evidence_count, 40);
    }

    #[test]
    fn test_estimated_bytes_grow_with_sentences() {
        let small = AssertionRecord::new("A", "C1", "B", "C2");
        let large = sample();
        assert!(large.estimated_bytes() > small.estimated_bytes());
    }

    #[test]
    fn test_metadata_projection() {
        let records = vec![sample(), AssertionRecord::new("A", "C1", "B", "C2")];
        let metadata = project_metadata(&records);

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0].position, 0);
        assert_eq!(metadata[0].citation_ids, vec!["1001", "1002"]);
        assert_eq!(metadata[0].degree, RelationshipDegree::First);
        assert_eq!(metadata[1].position, 1);
        assert!(metadata[1].citation_ids.is_empty());
    }

    #[test]
    fn test_edge_source_views_agree() {
        let record = sample();
        let meta = RecordMetadata::from_record(0, &record);
        assert_eq!(EdgeSource::subject_name(&record), EdgeSource::subject_name(&meta));
        assert_eq!(EdgeSource::object_id(&record), EdgeSource::object_id(&meta));
        assert_eq!(EdgeSource::degree(&record), EdgeSource::degree(&meta));
    }
}
