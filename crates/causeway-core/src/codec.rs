//! Binary Snapshot Codec
//!
//! Compact binary snapshots of record sets, with optional zstd compression.
//!
//! # Wire format
//!
//! ```text
//! offset  size  field
//! 0       4     magic "CWSN"
//! 4       1     format version
//! 5       1     payload kind (records, compact, ultra-compact, cache entry)
//! 6       1     compression (0 = none, 1 = zstd)
//! 7       1     zstd level (informational)
//! 8       8     body length (u64 LE, bytes as stored)
//! 16      8     raw length (u64 LE, bincode bytes before compression)
//! 24      n     body
//! 24+n    8     xxh64 checksum of bytes [0, 24+n)
//! ```
//!
//! Decoding never panics: truncated, tampered or foreign input yields
//! [`CodecError::CorruptSnapshot`].

use crate::compact::{CompactRecordSet, UltraCompactRecordSet};
use crate::record::AssertionRecord;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Magic bytes for snapshot files ("CWSN")
pub const SNAPSHOT_MAGIC: [u8; 4] = [0x43, 0x57, 0x53, 0x4E];

/// Snapshot format version
pub const SNAPSHOT_VERSION: u8 = 1;

/// File extension for precompiled snapshots placed next to interchange sources
pub const SNAPSHOT_EXTENSION: &str = "cwsnap";

/// Default zstd level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const HEADER_LEN: usize = 24;
const CHECKSUM_LEN: usize = 8;

/// Errors raised by snapshot encoding and decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Unexpected snapshot payload: expected {expected:?}, found {found:?}")]
    UnexpectedKind {
        expected: PayloadKind,
        found: PayloadKind,
    },

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptSnapshot(message.into())
    }
}

/// What a snapshot body contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Records,
    Compact,
    UltraCompact,
    CacheEntry,
}

impl PayloadKind {
    fn tag(self) -> u8 {
        match self {
            Self::Records => 1,
            Self::Compact => 2,
            Self::UltraCompact => 3,
            Self::CacheEntry => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Records),
            2 => Some(Self::Compact),
            3 => Some(Self::UltraCompact),
            4 => Some(Self::CacheEntry),
            _ => None,
        }
    }
}

/// Body compression mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Compression {
    /// Map a numeric level to a mode; 0 disables compression
    pub fn from_level(level: i32) -> Self {
        if level <= 0 {
            Self::None
        } else {
            Self::Zstd { level }
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zstd { .. } => 1,
        }
    }

    fn level(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zstd { level } => level.clamp(0, u8::MAX as i32) as u8,
        }
    }
}

/// Parsed snapshot header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u8,
    pub kind: PayloadKind,
    pub compressed: bool,
    pub level: u8,
    pub body_len: u64,
    pub raw_len: u64,
}

impl SnapshotHeader {
    /// Parse and validate the fixed-size header
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::corrupt(format!(
                "header truncated ({} of {} bytes)",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(CodecError::corrupt("bad magic bytes"));
        }
        let version = bytes[4];
        if version != SNAPSHOT_VERSION {
            return Err(CodecError::corrupt(format!(
                "unsupported format version {} (expected {})",
                version, SNAPSHOT_VERSION
            )));
        }
        let kind = PayloadKind::from_tag(bytes[5])
            .ok_or_else(|| CodecError::corrupt(format!("unknown payload kind {}", bytes[5])))?;
        let compressed = match bytes[6] {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::corrupt(format!(
                    "unknown compression tag {}",
                    other
                )))
            }
        };
        let body_len = read_u64(&bytes[8..16]);
        let raw_len = read_u64(&bytes[16..24]);

        Ok(Self {
            version,
            kind,
            compressed,
            level: bytes[7],
            body_len,
            raw_len,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// A decoded snapshot of any record-set kind
#[derive(Debug, Clone)]
pub enum Snapshot {
    Records(Vec<AssertionRecord>),
    Compact(CompactRecordSet),
    UltraCompact(UltraCompactRecordSet),
}

impl Snapshot {
    /// Convert to full records.
    ///
    /// Returns `(records, lossy)`; compact forms reset predicate and degree.
    pub fn into_records(self) -> Result<(Vec<AssertionRecord>, bool), CodecError> {
        match self {
            Self::Records(records) => Ok((records, false)),
            Self::Compact(set) => {
                let expansion = set
                    .expand()
                    .map_err(|e| CodecError::corrupt(e.to_string()))?;
                Ok((expansion.records, expansion.lossy))
            }
            Self::UltraCompact(set) => {
                let expansion = set
                    .expand()
                    .map_err(|e| CodecError::corrupt(e.to_string()))?;
                Ok((expansion.records, expansion.lossy))
            }
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Records(_) => PayloadKind::Records,
            Self::Compact(_) => PayloadKind::Compact,
            Self::UltraCompact(_) => PayloadKind::UltraCompact,
        }
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Serialize any payload into a framed snapshot
pub fn encode_payload<T: Serialize + ?Sized>(
    kind: PayloadKind,
    payload: &T,
    compression: Compression,
) -> Result<Vec<u8>, CodecError> {
    let raw = bincode_options()
        .serialize(payload)
        .map_err(|e| CodecError::Serialize(e.to_string()))?;

    let body = match compression {
        Compression::Zstd { level } => zstd::encode_all(raw.as_slice(), level)
            .map_err(|e| CodecError::Compression(e.to_string()))?,
        Compression::None => raw.clone(),
    };

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + CHECKSUM_LEN);
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.push(SNAPSHOT_VERSION);
    out.push(kind.tag());
    out.push(compression.tag());
    out.push(compression.level());
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(&(raw.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);

    let checksum = xxhash_rust::xxh64::xxh64(&out, 0);
    out.extend_from_slice(&checksum.to_le_bytes());

    debug!(
        "Encoded {:?} snapshot: {} raw bytes, {} stored bytes",
        kind,
        raw.len(),
        out.len()
    );
    Ok(out)
}

/// Verify framing and return the header plus the decompressed bincode bytes
fn unframe(bytes: &[u8]) -> Result<(SnapshotHeader, Vec<u8>), CodecError> {
    let header = SnapshotHeader::parse(bytes)?;

    let expected_len = (HEADER_LEN as u64)
        .checked_add(header.body_len)
        .and_then(|n| n.checked_add(CHECKSUM_LEN as u64))
        .ok_or_else(|| CodecError::corrupt("body length overflow"))?;
    if bytes.len() as u64 != expected_len {
        return Err(CodecError::corrupt(format!(
            "length mismatch: header declares {} bytes, found {}",
            expected_len,
            bytes.len()
        )));
    }

    let checksum_offset = bytes.len() - CHECKSUM_LEN;
    let stored = read_u64(&bytes[checksum_offset..]);
    let computed = xxhash_rust::xxh64::xxh64(&bytes[..checksum_offset], 0);
    if stored != computed {
        return Err(CodecError::corrupt(format!(
            "checksum mismatch: stored={:#x}, computed={:#x}",
            stored, computed
        )));
    }

    let body = &bytes[HEADER_LEN..checksum_offset];
    let raw = if header.compressed {
        let decoder =
            zstd::Decoder::new(body).map_err(|e| CodecError::corrupt(e.to_string()))?;
        let mut raw = Vec::with_capacity(header.raw_len.min(1 << 30) as usize);
        // One byte past the declared length is enough to detect an understated header
        decoder
            .take(header.raw_len.saturating_add(1))
            .read_to_end(&mut raw)
            .map_err(|e| CodecError::corrupt(format!("decompression failed: {}", e)))?;
        raw
    } else {
        body.to_vec()
    };

    if raw.len() as u64 != header.raw_len {
        return Err(CodecError::corrupt(format!(
            "raw length mismatch: header declares {}, decoded {}",
            header.raw_len,
            raw.len()
        )));
    }

    Ok((header, raw))
}

/// Decode a framed payload of the expected kind
pub fn decode_payload<T: DeserializeOwned>(
    bytes: &[u8],
    expected: PayloadKind,
) -> Result<T, CodecError> {
    let (header, raw) = unframe(bytes)?;
    if header.kind != expected {
        return Err(CodecError::UnexpectedKind {
            expected,
            found: header.kind,
        });
    }
    deserialize_body(&raw)
}

fn deserialize_body<T: DeserializeOwned>(raw: &[u8]) -> Result<T, CodecError> {
    bincode_options()
        .with_limit(raw.len() as u64)
        .deserialize(raw)
        .map_err(|e| CodecError::corrupt(format!("body decode failed: {}", e)))
}

/// Encode full records
pub fn encode(
    records: &[AssertionRecord],
    compression: Compression,
) -> Result<Vec<u8>, CodecError> {
    encode_payload(PayloadKind::Records, records, compression)
}

/// Decode full records; rejects compact payloads
pub fn decode(bytes: &[u8]) -> Result<Vec<AssertionRecord>, CodecError> {
    decode_payload(bytes, PayloadKind::Records)
}

pub fn encode_compact(
    set: &CompactRecordSet,
    compression: Compression,
) -> Result<Vec<u8>, CodecError> {
    encode_payload(PayloadKind::Compact, set, compression)
}

pub fn encode_ultra_compact(
    set: &UltraCompactRecordSet,
    compression: Compression,
) -> Result<Vec<u8>, CodecError> {
    encode_payload(PayloadKind::UltraCompact, set, compression)
}

/// Decode a snapshot of any record-set kind
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    let (header, raw) = unframe(bytes)?;
    match header.kind {
        PayloadKind::Records => Ok(Snapshot::Records(deserialize_body(&raw)?)),
        PayloadKind::Compact => {
            let set: CompactRecordSet = deserialize_body(&raw)?;
            set.validate()
                .map_err(|e| CodecError::corrupt(e.to_string()))?;
            Ok(Snapshot::Compact(set))
        }
        PayloadKind::UltraCompact => {
            let set: UltraCompactRecordSet = deserialize_body(&raw)?;
            set.validate()
                .map_err(|e| CodecError::corrupt(e.to_string()))?;
            Ok(Snapshot::UltraCompact(set))
        }
        found => Err(CodecError::UnexpectedKind {
            expected: PayloadKind::Records,
            found,
        }),
    }
}

/// Read and decode a snapshot file
pub fn read_snapshot(path: &Path) -> Result<Snapshot, CodecError> {
    let bytes = std::fs::read(path)?;
    decode_snapshot(&bytes)
}

/// Read only the header of a snapshot file
pub fn inspect_snapshot(path: &Path) -> Result<SnapshotHeader, CodecError> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    SnapshotHeader::parse(&header[..filled])
}

/// Encode records and write them to `path` atomically
pub fn write_snapshot(
    path: &Path,
    records: &[AssertionRecord],
    compression: Compression,
) -> Result<u64, CodecError> {
    let bytes = encode(records, compression)?;
    write_atomic(path, &bytes)?;
    info!(
        "Wrote snapshot with {} records to {:?} ({} bytes)",
        records.len(),
        path,
        bytes.len()
    );
    Ok(bytes.len() as u64)
}

/// Precompiled snapshot path for an interchange source
pub fn snapshot_path_for(source: &Path) -> PathBuf {
    source.with_extension(SNAPSHOT_EXTENSION)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write bytes to `path` via a sibling temp file and rename.
///
/// Readers either see the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::compact;
    use crate::record::RelationshipDegree;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_records() -> Vec<AssertionRecord> {
        vec![
            AssertionRecord::new("Smoking", "C0037369", "Lung Cancer", "C0242379")
                .with_degree(RelationshipDegree::First)
                .with_citation("1001", ["Smoking causes cancer.", "Strong association."])
                .with_citation("1002", ["Smoking causes cancer."]),
            AssertionRecord::new("Obesity", "C0028754", "Diabetes", "C0011849")
                .with_predicate("PREDISPOSES")
                .with_degree(RelationshipDegree::Second)
                .with_evidence_count(57),
            AssertionRecord::new("Ünïcode", "C1", "名前", "C2").with_citation("x", ["— ✓"]),
        ]
    }

    #[test]
    fn test_roundtrip_uncompressed_and_zstd() {
        let records = sample_records();
        for compression in [Compression::None, Compression::Zstd { level: 9 }] {
            let bytes = encode(&records, compression).unwrap();
            assert_eq!(decode(&bytes).unwrap(), records);
        }
    }

    #[test]
    fn test_roundtrip_empty() {
        let bytes = encode(&[], Compression::default()).unwrap();
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_header_fields() {
        let bytes = encode(&sample_records(), Compression::Zstd { level: 5 }).unwrap();
        let header = SnapshotHeader::parse(&bytes).unwrap();
        assert_eq!(header.version, SNAPSHOT_VERSION);
        assert_eq!(header.kind, PayloadKind::Records);
        assert!(header.compressed);
        assert_eq!(header.level, 5);
        assert_eq!(
            header.body_len as usize,
            bytes.len() - HEADER_LEN - CHECKSUM_LEN
        );
    }

    #[test]
    fn test_truncated_input_is_corrupt() {
        let bytes = encode(&sample_records(), Compression::None).unwrap();
        for cut in [0, 3, HEADER_LEN - 1, HEADER_LEN + 2, bytes.len() - 1] {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CodecError::CorruptSnapshot(_)),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut bytes = encode(&sample_records(), Compression::default()).unwrap();
        let mid = HEADER_LEN + 4;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            CodecError::CorruptSnapshot(_)
        ));
    }

    /// Rewrite the declared raw length and re-seal the checksum
    fn with_raw_len(mut bytes: Vec<u8>, raw_len: u64) -> Vec<u8> {
        bytes[16..24].copy_from_slice(&raw_len.to_le_bytes());
        let checksum_offset = bytes.len() - CHECKSUM_LEN;
        let checksum = xxhash_rust::xxh64::xxh64(&bytes[..checksum_offset], 0);
        bytes[checksum_offset..].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    #[test]
    fn test_understated_raw_length_is_corrupt() {
        let records: Vec<AssertionRecord> = (0..200)
            .map(|i| {
                AssertionRecord::new(format!("S{}", i), "C1", "Object", "C2")
                    .with_citation("1", ["The same sentence, repeated many times over."])
            })
            .collect();
        let bytes = encode(&records, Compression::default()).unwrap();
        let header = SnapshotHeader::parse(&bytes).unwrap();

        for declared in [0, 16, header.raw_len - 1] {
            match decode(&with_raw_len(bytes.clone(), declared)).unwrap_err() {
                CodecError::CorruptSnapshot(message) => {
                    assert!(message.contains("raw length"), "{}", message)
                }
                other => panic!("expected corrupt snapshot, got {:?}", other),
            }
        }
        assert_eq!(decode(&with_raw_len(bytes, header.raw_len)).unwrap(), records);
    }

    #[test]
    fn test_foreign_bytes_are_corrupt() {
        let err = decode(b"[{\"subject_name\": \"not a snapshot\"}]").unwrap_err();
        assert!(matches!(err, CodecError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_decode_rejects_compact_kind() {
        let set = compact(&sample_records());
        let bytes = encode_compact(&set, Compression::None).unwrap();
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            CodecError::UnexpectedKind {
                expected: PayloadKind::Records,
                found: PayloadKind::Compact
            }
        ));
    }

    #[test]
    fn test_decode_snapshot_compact_is_lossy() {
        let records = sample_records();
        let bytes = encode_compact(&compact(&records), Compression::default()).unwrap();
        let snapshot = decode_snapshot(&bytes).unwrap();
        assert_eq!(snapshot.kind(), PayloadKind::Compact);

        let (expanded, lossy) = snapshot.into_records().unwrap();
        assert!(lossy);
        assert_eq!(expanded.len(), records.len());
        assert_eq!(expanded[1].evidence_count, 57);
    }

    #[test]
    fn test_write_snapshot_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("records.cwsnap");

        write_snapshot(&path, &sample_records(), Compression::default()).unwrap();
        write_snapshot(&path, &sample_records()[..1], Compression::default()).unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        let (records, lossy) = snapshot.into_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!lossy);

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_inspect_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.cwsnap");
        write_snapshot(&path, &sample_records(), Compression::None).unwrap();

        let header = inspect_snapshot(&path).unwrap();
        assert_eq!(header.kind, PayloadKind::Records);
        assert!(!header.compressed);
    }

    #[test]
    fn test_snapshot_path_for() {
        assert_eq!(
            snapshot_path_for(Path::new("/data/degree_1.json")),
            PathBuf::from("/data/degree_1.cwsnap")
        );
    }
}
