//! Interchange Format
//!
//! Reads and writes the verbose JSON interchange format: a top-level array of
//! assertion objects.
//!
//! ```json
//! [
//!   {
//!     "subject_name": "Smoking", "subject_cui": "C0037369",
//!     "predicate": "CAUSES",
//!     "object_name": "Lung Cancer", "object_cui": "C0242379",
//!     "evidence_count": 2, "relationship_degree": "1",
//!     "pmid_data": { "1001": { "sentences": ["..."] } }
//!   }
//! ]
//! ```
//!
//! Parsing is lenient per record: a record that fails to deserialize or lacks identity
//! fields is skipped with a [`ParseWarning`] rather than failing the whole document.

use crate::codec::write_atomic;
use crate::record::{AssertionRecord, RelationshipDegree, DEFAULT_PREDICATE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that abort parsing of a whole interchange document
#[derive(Debug, Error)]
pub enum InterchangeError {
    #[error("Source file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interchange document must be a JSON array of records")]
    NotAnArray,
}

/// Why a single record was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejection {
    #[error("invalid record JSON: {0}")]
    InvalidJson(String),

    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),
}

/// A non-fatal, per-record parse failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Zero-based position of the record in the source document
    pub position: usize,
    pub reason: String,
}

/// Outcome of parsing an interchange document
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub records: Vec<AssertionRecord>,
    pub warnings: Vec<ParseWarning>,
}

impl ParseReport {
    /// Number of records skipped
    pub fn skipped(&self) -> usize {
        self.warnings.len()
    }

    /// Number of record objects seen (accepted + skipped)
    pub fn total_seen(&self) -> usize {
        self.records.len() + self.warnings.len()
    }
}

/// Citation evidence, either `{ "sentences": [...] }` or a bare sentence array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCitation {
    Wrapped {
        #[serde(default)]
        sentences: Vec<String>,
    },
    Bare(Vec<String>),
}

impl RawCitation {
    fn into_sentences(self) -> Vec<String> {
        match self {
            Self::Wrapped { sentences } => sentences,
            Self::Bare(sentences) => sentences,
        }
    }
}

/// Loosely-typed record as it appears on the wire
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    subject_name: Option<Value>,
    #[serde(default, alias = "subject_id")]
    subject_cui: Option<Value>,
    #[serde(default)]
    predicate: Option<Value>,
    #[serde(default)]
    object_name: Option<Value>,
    #[serde(default, alias = "object_id")]
    object_cui: Option<Value>,
    #[serde(default)]
    evidence_count: Option<Value>,
    #[serde(default)]
    relationship_degree: Option<Value>,
    #[serde(default, alias = "citations")]
    pmid_data: Option<BTreeMap<String, RawCitation>>,
}

/// Render a scalar JSON value as a trimmed string
fn scalar_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_degree(value: Option<Value>) -> RelationshipDegree {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(RelationshipDegree::from_number)
            .unwrap_or_default(),
        Some(Value::String(s)) => RelationshipDegree::parse(&s),
        _ => RelationshipDegree::Unknown,
    }
}

fn parse_count(value: Option<Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawRecord {
    fn into_record(self) -> Result<AssertionRecord, RecordRejection> {
        let subject_name =
            scalar_string(self.subject_name).ok_or(RecordRejection::MissingField("subject_name"))?;
        let subject_id =
            scalar_string(self.subject_cui).ok_or(RecordRejection::MissingField("subject_cui"))?;
        let object_name =
            scalar_string(self.object_name).ok_or(RecordRejection::MissingField("object_name"))?;
        let object_id =
            scalar_string(self.object_cui).ok_or(RecordRejection::MissingField("object_cui"))?;

        let citations: BTreeMap<String, Vec<String>> = self
            .pmid_data
            .unwrap_or_default()
            .into_iter()
            .map(|(id, citation)| (id, citation.into_sentences()))
            .collect();

        let evidence_count =
            parse_count(self.evidence_count).unwrap_or(citations.len() as u64);

        Ok(AssertionRecord {
            subject_name,
            subject_id,
            predicate: scalar_string(self.predicate)
                .unwrap_or_else(|| DEFAULT_PREDICATE.to_string()),
            object_name,
            object_id,
            evidence_count,
            degree: parse_degree(self.relationship_degree),
            citations,
        })
    }
}

/// Parse one record object from its raw JSON text
pub fn parse_record(bytes: &[u8]) -> Result<AssertionRecord, RecordRejection> {
    let raw: RawRecord = serde_json::from_slice(bytes)
        .map_err(|e| RecordRejection::InvalidJson(e.to_string()))?;
    raw.into_record()
}

/// Parse one record from an already-decoded JSON value
pub fn record_from_value(value: Value) -> Result<AssertionRecord, RecordRejection> {
    let raw: RawRecord =
        serde_json::from_value(value).map_err(|e| RecordRejection::InvalidJson(e.to_string()))?;
    raw.into_record()
}

/// Parse a complete interchange document held in memory
pub fn parse_records(bytes: &[u8]) -> Result<ParseReport, InterchangeError> {
    let document: Value = serde_json::from_slice(bytes)?;
    let Value::Array(items) = document else {
        return Err(InterchangeError::NotAnArray);
    };

    let mut report = ParseReport {
        records: Vec::with_capacity(items.len()),
        warnings: Vec::new(),
    };

    for (position, item) in items.into_iter().enumerate() {
        match record_from_value(item) {
            Ok(record) => report.records.push(record),
            Err(rejection) => {
                warn!("Skipping record {}: {}", position, rejection);
                report.warnings.push(ParseWarning {
                    position,
                    reason: rejection.to_string(),
                });
            }
        }
    }

    debug!(
        "Parsed {} records ({} skipped)",
        report.records.len(),
        report.skipped()
    );
    Ok(report)
}

/// Read and parse an interchange file
pub fn read_records(path: &Path) -> Result<ParseReport, InterchangeError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InterchangeError::NotFound(path.to_path_buf()),
        _ => InterchangeError::Io(e),
    })?;
    parse_records(&bytes)
}

#[derive(Serialize)]
struct WireCitation<'a> {
    sentences: &'a [String],
}

#[derive(Serialize)]
struct WireRecord<'a> {
    subject_name: &'a str,
    subject_cui: &'a str,
    predicate: &'a str,
    object_name: &'a str,
    object_cui: &'a str,
    evidence_count: u64,
    relationship_degree: &'static str,
    pmid_data: BTreeMap<&'a str, WireCitation<'a>>,
}

impl<'a> From<&'a AssertionRecord> for WireRecord<'a> {
    fn from(record: &'a AssertionRecord) -> Self {
        Self {
            subject_name: &record.subject_name,
            subject_cui: &record.subject_id,
            predicate: &record.predicate,
            object_name: &record.object_name,
            object_cui: &record.object_id,
            evidence_count: record.evidence_count,
            relationship_degree: record.degree.as_str(),
            pmid_data: record
                .citations
                .iter()
                .map(|(id, sentences)| (id.as_str(), WireCitation { sentences }))
                .collect(),
        }
    }
}

/// Serialize records to interchange JSON
pub fn to_json(records: &[AssertionRecord], pretty: bool) -> Result<Vec<u8>, InterchangeError> {
    let wire: Vec<WireRecord<'_>> = records.iter().map(WireRecord::from).collect();
    let bytes = if pretty {
        serde_json::to_vec_pretty(&wire)?
    } else {
        serde_json::to_vec(&wire)?
    };
    Ok(bytes)
}

/// Write records to an interchange file (atomically)
pub fn write_records(
    path: &Path,
    records: &[AssertionRecord],
    pretty: bool,
) -> Result<(), InterchangeError> {
    let bytes = to_json(records, pretty)?;
    write_atomic(path, &bytes)?;
    debug!("Wrote {} records to {:?}", records.len(), path);
    Ok(())
}
